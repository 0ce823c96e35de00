//! Optional diagnostic decorator: every send/recv is preceded by a 4-byte
//! length and a 4-byte per-endpoint sequence number the receiver echoes
//! back. A mismatch logs a diagnostic and pauses briefly rather than
//! aborting outright, to give an operator a window to attach a debugger.
//!
//! Implemented as a wrapper around any `Transport` rather than a branch
//! inside the stream back-end, so it composes with every mode.

use byteorder::{BigEndian, ByteOrder};
use clustersync_proto::logging::{self, Logger};
use clustersync_proto::NetworkResult;
use std::thread;
use std::time::Duration;

use crate::transport::Transport;

const FRAME_PREFIX: usize = 8;
const STALL_ON_MISMATCH: Duration = Duration::from_millis(250);

pub struct DebugFramed<T: Transport> {
    inner: T,
    send_sequence: u32,
    recv_sequence: u32,
    log: Logger,
}

impl<T: Transport> DebugFramed<T> {
    pub fn new(inner: T, log: &Logger) -> DebugFramed<T> {
        DebugFramed {
            inner,
            send_sequence: 0,
            recv_sequence: 0,
            log: log.clone(),
        }
    }

    fn framed_send(&mut self, payload: &[u8], send: impl FnOnce(&mut T, &[u8]) -> NetworkResult<()>) -> NetworkResult<()> {
        let mut header = [0u8; FRAME_PREFIX];
        BigEndian::write_u32(&mut header[0..4], payload.len() as u32);
        BigEndian::write_u32(&mut header[4..8], self.send_sequence);

        let mut framed = Vec::with_capacity(FRAME_PREFIX + payload.len());
        framed.extend_from_slice(&header);
        framed.extend_from_slice(payload);

        send(&mut self.inner, &framed)?;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        Ok(())
    }

    fn framed_recv(&mut self, buf: &mut [u8], recv: impl Fn(&mut T, &mut [u8]) -> NetworkResult<()>) -> NetworkResult<()> {
        let mut header = [0u8; FRAME_PREFIX];
        recv(&mut self.inner, &mut header)?;

        let length = BigEndian::read_u32(&header[0..4]) as usize;
        let sequence = BigEndian::read_u32(&header[4..8]);

        if sequence != self.recv_sequence {
            logging::warn!(self.log, "debug-framed sequence mismatch";
                "expected" => self.recv_sequence, "actual" => sequence);
            thread::sleep(STALL_ON_MISMATCH);
        }

        if length != buf.len() {
            logging::warn!(self.log, "debug-framed length mismatch";
                "expected" => buf.len(), "actual" => length);
            thread::sleep(STALL_ON_MISMATCH);
        }

        recv(&mut self.inner, buf)?;
        self.recv_sequence = self.recv_sequence.wrapping_add(1);
        Ok(())
    }
}

impl<T: Transport> Transport for DebugFramed<T> {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.framed_send(bytes, |inner, data| inner.send_to_all(data))
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        self.framed_recv(buf, |inner, data| inner.recv_from_master(data))
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.framed_send(bytes, |inner, data| inner.send_to_master(data))
    }

    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        self.framed_recv(buf, |inner, data| inner.recv_from_slave(index, data))
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        self.inner.barrier()
    }

    fn begin_barrier(&mut self) -> NetworkResult<()> {
        self.inner.begin_barrier()
    }

    fn finish_barrier(&mut self) -> NetworkResult<()> {
        self.inner.finish_barrier()
    }

    fn self_framed(&self) -> bool {
        self.inner.self_framed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_proto::{ErrorType, NetworkError};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        sent: Vec<Vec<u8>>,
        to_play: Vec<u8>,
    }

    struct LoopbackTransport {
        shared: Arc<Mutex<Recorder>>,
        cursor: usize,
    }

    impl Transport for LoopbackTransport {
        fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
            self.shared.lock().unwrap().sent.push(bytes.to_vec());
            Ok(())
        }

        fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
            let recorder = self.shared.lock().unwrap();
            let remaining = &recorder.to_play[self.cursor..];
            if remaining.len() < buf.len() {
                return Err(NetworkError::Fatal(ErrorType::ConnectionClosed));
            }
            buf.copy_from_slice(&remaining[..buf.len()]);
            self.cursor += buf.len();
            Ok(())
        }

        fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
            self.send_to_all(bytes)
        }

        fn recv_from_slave(&mut self, _index: usize, buf: &mut [u8]) -> NetworkResult<()> {
            self.recv_from_master(buf)
        }

        fn barrier(&mut self) -> NetworkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn framed_send_prefixes_length_and_sequence() {
        let shared = Arc::new(Mutex::new(Recorder::default()));
        let inner = LoopbackTransport {
            shared: shared.clone(),
            cursor: 0,
        };
        let log = logging::root_logger(false);
        let mut framed = DebugFramed::new(inner, &log);

        framed.send_to_all(&[1, 2, 3]).unwrap();

        let locked = shared.lock().unwrap();
        let sent = &locked.sent[0];
        assert_eq!(BigEndian::read_u32(&sent[0..4]), 3);
        assert_eq!(BigEndian::read_u32(&sent[4..8]), 0);
        assert_eq!(&sent[8..], &[1, 2, 3]);
    }
}
