use serde::{Deserialize, Serialize};

/// A node's position in the cluster. Rank 0 is always the master; every
/// other rank in `[1, N]` is a slave. Immutable for the lifetime of the
/// process.
pub type Rank = u32;

/// Whether this process drives the cluster (`Master`) or follows it
/// (`Slave`). Derived once, at `Controller` construction, from the local
/// rank — never mutated afterwards.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Master,
    Slave,
}

impl Role {
    #[inline]
    pub fn from_rank(rank: Rank) -> Role {
        if rank == 0 {
            Role::Master
        } else {
            Role::Slave
        }
    }

    #[inline]
    pub fn is_master(self) -> bool {
        matches!(self, Role::Master)
    }
}

/// Selects which transport back-end carries both the app and draw channels
/// for the whole cluster. Chosen by the master at start-up and obeyed by
/// every slave; never renegotiated mid-run.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Stream,
    Datagram,
    ReliableMulticast,
    MessagePassing,
    SerialLine,
    ParallelPort,
    StreamPlusSerial,
    Magic,
}

impl SyncMode {
    /// The fallback mode used whenever the configured mode cannot be
    /// constructed (unsupported platform, feature not compiled in, device
    /// open failure).
    pub const FALLBACK: SyncMode = SyncMode::Stream;
}

/// Selects which of the two channels enforces the per-frame barrier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncProcess {
    BarrierOnApp,
    BarrierOnDraw,
}

/// The two independent logical channels multiplexed over a sync mode's
/// transport. Each has its own transport instance, heartbeat counter and
/// byte accounting; no ordering is guaranteed between them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Channel {
    App,
    Draw,
}

impl Channel {
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Channel::App => "app",
            Channel::Draw => "draw",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_zero_is_master() {
        assert_eq!(Role::from_rank(0), Role::Master);
    }

    #[test]
    fn nonzero_rank_is_slave() {
        assert_eq!(Role::from_rank(1), Role::Slave);
        assert_eq!(Role::from_rank(7), Role::Slave);
    }
}
