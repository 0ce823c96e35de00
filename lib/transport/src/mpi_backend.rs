//! Message-passing back-end built on the `mpi` crate. Compiled only when
//! the `mpi-backend` feature is enabled; its absence from the build when
//! the feature is off is the "omit the implementation" redesign the
//! message-passing mode calls for, with a runtime fallback to
//! `SyncMode::Stream` handled by the `Controller`.
//!
//! Two communicators are used: one carries the app channel, the other
//! the draw channel, so the two stay independent exactly as the other
//! back-ends keep them independent via separate sockets/devices.

use byteorder::{BigEndian, ByteOrder};
use clustersync_proto::logging::{self, Logger};
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use mpi::collective::CommunicatorCollectives;
use mpi::point_to_point::{Destination, Source};
use mpi::topology::Communicator;

use crate::transport::Transport;

const APP_TAG: i32 = 1;
const DRAW_TAG: i32 = 2;

pub struct MpiTransport<'a> {
    comm: &'a dyn Communicator,
    tag: i32,
    rank: i32,
    size: i32,
    log: Logger,
}

impl<'a> MpiTransport<'a> {
    pub fn new_app(comm: &'a dyn Communicator, log: &Logger) -> MpiTransport<'a> {
        MpiTransport::new(comm, APP_TAG, log)
    }

    pub fn new_draw(comm: &'a dyn Communicator, log: &Logger) -> MpiTransport<'a> {
        MpiTransport::new(comm, DRAW_TAG, log)
    }

    fn new(comm: &'a dyn Communicator, tag: i32, log: &Logger) -> MpiTransport<'a> {
        MpiTransport {
            comm,
            tag,
            rank: comm.rank(),
            size: comm.size(),
            log: log.clone(),
        }
    }

    pub fn rank(&self) -> u32 {
        self.rank as u32
    }

    pub fn num_slaves(&self) -> u32 {
        (self.size - 1) as u32
    }
}

impl<'a> Transport for MpiTransport<'a> {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        logging::trace!(self.log, "mpi broadcast"; "tag" => self.tag, "len" => bytes.len());
        for slave_rank in 1..self.size {
            self.comm.process_at_rank(slave_rank).send_with_tag(bytes, self.tag);
        }
        Ok(())
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        let (message, _status) = self.comm.process_at_rank(0).receive_vec_with_tag::<u8>(self.tag);
        if message.len() != buf.len() {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        buf.copy_from_slice(&message);
        Ok(())
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.comm.process_at_rank(0).send_with_tag(bytes, self.tag);
        Ok(())
    }

    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        let rank = (index + 1) as i32;
        let (message, _status) = self.comm.process_at_rank(rank).receive_vec_with_tag::<u8>(self.tag);
        if message.len() != buf.len() {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        buf.copy_from_slice(&message);
        Ok(())
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        self.comm.barrier();
        Ok(())
    }

    fn self_framed(&self) -> bool {
        // The header is sent as a 4-int buffer ahead of the payload
        // (see module docs), so the Controller's own framing is skipped.
        true
    }
}

/// Encodes the 16-byte header as a 4-int buffer for the wire shape MPI
/// message-passing uses, matching the rest of the cluster's big-endian
/// convention even though MPI itself is endian-agnostic on a homogeneous
/// cluster.
pub fn header_to_ints(header: &clustersync_proto::Header) -> [u8; 16] {
    let mut buf = [0u8; 16];
    BigEndian::write_u32(&mut buf[0..4], header.sender_rank);
    BigEndian::write_u32(&mut buf[4..8], header.send_kind);
    BigEndian::write_u32(&mut buf[8..12], header.type_tag);
    BigEndian::write_u32(&mut buf[12..16], header.payload_length);
    buf
}
