//! RS-232 modem-control-line back-end. No data is carried on the wire at
//! all — only RTS (request to send) is driven and CTS (clear to send) is
//! polled. A toggling-edge scheme (the expected level flips every call)
//! avoids needing an explicit reset between barriers.
//!
//! `send_to_all`/`recv_from_master` are not meaningful on this back-end;
//! it is only ever used for `barrier()`, either stand-alone (`SerialLine`)
//! or as the barrier half of `StreamPlusSerial`.

use clustersync_proto::logging::{self, Logger};
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use serialport::SerialPort;
use std::io;
use std::thread;
use std::time::Duration;

use crate::transport::Transport;

const POLL_INTERVAL: Duration = Duration::from_micros(500);

/// `serialport::Error` is foreign to both this crate and `NetworkError`,
/// so it can't get a `From` impl under the orphan rules; map it by hand
/// at each call site instead.
fn map_serial_err(err: serialport::Error) -> NetworkError {
    match err.kind {
        serialport::ErrorKind::Io(kind) => io::Error::from(kind).into(),
        _ => NetworkError::Fatal(ErrorType::Io(io::ErrorKind::Other)),
    }
}

pub struct SerialLine {
    port: Box<dyn SerialPort>,
    role: SerialRole,
    expected_edge: bool,
    log: Logger,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SerialRole {
    Master,
    Slave,
}

impl SerialLine {
    pub fn open(device: &str, role: SerialRole, log: &Logger) -> NetworkResult<SerialLine> {
        let port = serialport::new(device, 9600).open().map_err(map_serial_err)?;
        logging::debug!(log, "serial line opened"; "device" => device);
        Ok(SerialLine {
            port,
            role,
            expected_edge: false,
            log: log.clone(),
        })
    }

    fn cts_is(&mut self, level: bool) -> NetworkResult<bool> {
        let cts = self.port.read_clear_to_send().map_err(map_serial_err)?;
        Ok(cts == level)
    }

    /// Waits for CTS to reach `target`. `target` must be the edge this
    /// node just toggled its own RTS to, not a value read before the
    /// toggle — both sides toggle to the same edge each round, so that
    /// is the value the peer will also be driving.
    fn wait_for_cts_edge(&mut self, target: bool) -> NetworkResult<()> {
        while !self.cts_is(target)? {
            thread::sleep(POLL_INTERVAL);
        }
        Ok(())
    }

    /// Flips the line's edge and writes it to RTS, returning the new
    /// value so the caller can wait on that same edge.
    fn toggle_rts(&mut self) -> NetworkResult<bool> {
        self.expected_edge = !self.expected_edge;
        self.port.write_request_to_send(self.expected_edge).map_err(map_serial_err)?;
        Ok(self.expected_edge)
    }
}

impl Transport for SerialLine {
    fn send_to_all(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("serial line back-end carries no payload, only barrier state");
    }

    fn recv_from_master(&mut self, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("serial line back-end carries no payload, only barrier state");
    }

    fn send_to_master(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("serial line back-end carries no payload, only barrier state");
    }

    fn recv_from_slave(&mut self, _index: usize, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("serial line back-end carries no payload, only barrier state");
    }

    /// Both roles toggle their own RTS to this round's edge, then wait
    /// for CTS to show the peer driving that same edge. Master and
    /// slave run the identical sequence; which side toggles first does
    /// not matter, since the wait target comes from this round's own
    /// toggle rather than the previous round's state.
    fn barrier(&mut self) -> NetworkResult<()> {
        logging::trace!(self.log, "serial barrier"; "role" => ?self.role);
        let target = self.toggle_rts()?;
        self.wait_for_cts_edge(target)
    }
}

/// Pure toggle-state-machine logic, separated out so it can be exercised
/// without a wired-loopback serial cable.
pub struct ToggleEdge(bool);

impl ToggleEdge {
    pub fn new() -> ToggleEdge {
        ToggleEdge(false)
    }

    pub fn flip(&mut self) -> bool {
        self.0 = !self.0;
        self.0
    }
}

impl Default for ToggleEdge {
    fn default() -> ToggleEdge {
        ToggleEdge::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_consecutive_flips_alternate_the_edge() {
        let mut edge = ToggleEdge::new();
        assert!(edge.flip());
        assert!(!edge.flip());
        assert!(edge.flip());
    }
}
