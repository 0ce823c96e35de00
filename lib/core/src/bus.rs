use clustersync_proto::logging::{self, Logger};
use clustersync_proto::Message;
use std::time::{Duration, Instant};

/// Caps how many external-bus messages `sync_external_bus_messages` will
/// relay in a single call; the excess is dropped, not queued, since the
/// bus is expected to be drained every frame.
pub const MAX_RELAY: usize = 500;

const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Implemented by the hosting application to connect the cluster's
/// per-frame loop to an external collaborative client (e.g. a scene
/// authoring tool). The master polls this trait; slaves never call it
/// directly but receive the same messages relayed over the sync channel.
pub trait ExternalBusClient {
    /// Returns the next pending message, if any, without blocking.
    fn poll(&mut self) -> Option<Message>;

    /// True once the underlying connection has dropped.
    fn is_disconnected(&self) -> bool;

    /// Attempts to (re)establish the connection.
    fn reconnect(&mut self) -> bool;
}

/// Drives the reconnect back-off and message cap described in
/// `Controller::sync_external_bus_messages`; kept separate from the
/// `Controller` so it can be unit tested without a real transport.
pub struct BusRelay {
    last_reconnect_attempt: Option<Instant>,
    log: Logger,
}

impl BusRelay {
    pub fn new(log: &Logger) -> BusRelay {
        BusRelay {
            last_reconnect_attempt: None,
            log: log.clone(),
        }
    }

    /// Drains up to `MAX_RELAY` messages from `client`, returning them
    /// for the caller to broadcast. If `client` is disconnected, attempts
    /// a reconnect at most once per `RECONNECT_INTERVAL`.
    pub fn drain<C: ExternalBusClient>(&mut self, client: &mut C, now: Instant) -> Vec<Message> {
        if client.is_disconnected() {
            let should_retry = self.last_reconnect_attempt.map_or(true, |last| now.duration_since(last) >= RECONNECT_INTERVAL);

            if should_retry {
                self.last_reconnect_attempt = Some(now);
                if client.reconnect() {
                    logging::info!(self.log, "external bus reconnected");
                } else {
                    logging::debug!(self.log, "external bus reconnect attempt failed");
                }
            }
            return Vec::new();
        }

        let mut messages = Vec::new();
        while messages.len() < MAX_RELAY {
            match client.poll() {
                Some(message) => messages.push(message),
                None => break,
            }
        }

        if messages.len() == MAX_RELAY {
            logging::warn!(self.log, "external bus relay cap reached, excess messages dropped this frame";
                "cap" => MAX_RELAY);
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeClient {
        queue: VecDeque<Message>,
        disconnected: bool,
        reconnect_succeeds: bool,
    }

    impl ExternalBusClient for FakeClient {
        fn poll(&mut self) -> Option<Message> {
            self.queue.pop_front()
        }

        fn is_disconnected(&self) -> bool {
            self.disconnected
        }

        fn reconnect(&mut self) -> bool {
            if self.reconnect_succeeds {
                self.disconnected = false;
            }
            self.reconnect_succeeds
        }
    }

    fn make_message(tag: u32) -> Message {
        Message::new(0, 0, tag, vec![])
    }

    #[test]
    fn drains_up_to_cap_and_leaves_rest() {
        let log = logging::root_logger(false);
        let mut relay = BusRelay::new(&log);

        let mut queue = VecDeque::new();
        for i in 0..(MAX_RELAY + 10) {
            queue.push_back(make_message(i as u32));
        }

        let mut client = FakeClient {
            queue,
            disconnected: false,
            reconnect_succeeds: false,
        };

        let drained = relay.drain(&mut client, Instant::now());
        assert_eq!(drained.len(), MAX_RELAY);
        assert_eq!(client.queue.len(), 10);
    }

    #[test]
    fn disconnected_client_yields_nothing_until_reconnect() {
        let log = logging::root_logger(false);
        let mut relay = BusRelay::new(&log);

        let mut client = FakeClient {
            queue: VecDeque::from(vec![make_message(1)]),
            disconnected: true,
            reconnect_succeeds: true,
        };

        let drained = relay.drain(&mut client, Instant::now());
        assert!(drained.is_empty());
        assert!(!client.disconnected);
    }
}
