//! Composite back-end: bulk payloads ride the stream transport, the
//! barrier rides the serial line instead of a TCP round trip, trading a
//! socket round trip for a much lower-latency RTS/CTS edge.

use clustersync_proto::NetworkResult;

use crate::serial::SerialLine;
use crate::transport::Transport;

pub struct StreamPlusSerial<S: Transport> {
    stream: S,
    serial: SerialLine,
}

impl<S: Transport> StreamPlusSerial<S> {
    pub fn new(stream: S, serial: SerialLine) -> StreamPlusSerial<S> {
        StreamPlusSerial { stream, serial }
    }
}

impl<S: Transport> Transport for StreamPlusSerial<S> {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.stream.send_to_all(bytes)
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        self.stream.recv_from_master(buf)
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.stream.send_to_master(bytes)
    }

    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        self.stream.recv_from_slave(index, buf)
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        self.serial.barrier()
    }

    fn self_framed(&self) -> bool {
        self.stream.self_framed()
    }
}
