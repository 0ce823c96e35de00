use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Top level error returned by every transport and controller operation.
///
/// `Wait` is never fatal: it signals that the caller should retry the same
/// call, and corresponds to a non-blocking I/O source reporting `WouldBlock`
/// or a signal interrupting a blocking call. Every other variant is fatal —
/// per the cluster's error handling policy, a fatal transport error or a
/// divergence between nodes must abort the detecting process rather than
/// attempt recovery.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    /// A peer reported or was detected to hold a different value for state
    /// that must be identical across the cluster (frame number, heartbeat
    /// counter, debug sequence number).
    Divergence { rank: u32, expected: i64, actual: i64 },
    /// The requested sync mode could not be constructed (missing hardware,
    /// device open failure, feature not compiled in).
    ModeUnavailable,
    /// A short read/write made no progress and the peer is presumed gone.
    ConnectionClosed,
    PayloadTooLarge,
    Serialization,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

pub trait ErrorUtils {
    /// True for any outcome other than a clean success or a retryable wait.
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_never_counts_as_failed() {
        let result: NetworkResult<()> = Err(NetworkError::Wait);
        assert!(!result.has_failed());
    }

    #[test]
    fn fatal_counts_as_failed() {
        let result: NetworkResult<()> = Err(NetworkError::Fatal(ErrorType::ConnectionClosed));
        assert!(result.has_failed());
    }

    #[test]
    fn would_block_maps_to_wait() {
        let io_err: io::Error = io::ErrorKind::WouldBlock.into();
        assert_eq!(NetworkError::from(io_err), NetworkError::Wait);
    }

    #[test]
    fn other_io_errors_are_fatal() {
        let io_err: io::Error = io::ErrorKind::ConnectionReset.into();
        assert_eq!(
            NetworkError::from(io_err),
            NetworkError::Fatal(ErrorType::Io(io::ErrorKind::ConnectionReset))
        );
    }
}
