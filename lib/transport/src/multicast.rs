//! Reliable-multicast back-end. One multicast group per cluster: the
//! master opens a sender socket, every slave a receiver socket bound to
//! the group. This back-end frames its own messages (see
//! `Transport::self_framed`), since a datagram boundary already carries
//! the 16-byte header the `Controller` would otherwise prefix.
//!
//! Outbound messages longer than `max_length` are split into
//! `max_length`-sized chunks with a final, shorter chunk for the
//! remainder; receivers reassemble by summing the reported lengths. Any
//! transport error here is fatal — there is no retry budget for a lost
//! multicast datagram in this implementation.

use clustersync_proto::config::MulticastConfig;
use clustersync_proto::logging::{self, Logger};
use clustersync_proto::role::Rank;
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use crate::transport::Transport;

/// Distinguishes the two sides of a shared multicast group so `barrier`
/// can run the same gather-then-release protocol `Stream` uses, even
/// though every node talks over one group address instead of a
/// point-to-point socket per slave.
#[derive(Clone, Copy)]
pub enum MulticastRole {
    Master { num_slaves: usize },
    Slave { rank: Rank },
}

/// Splits `payload` into `max_length`-sized chunks, the last one carrying
/// the remainder. Returns an empty single chunk for an empty payload so
/// callers always transmit at least once.
pub fn chunk_payload(payload: &[u8], max_length: usize) -> Vec<&[u8]> {
    if payload.is_empty() {
        return vec![payload];
    }
    payload.chunks(max_length).collect()
}

fn bind_multicast_socket(config: &MulticastConfig) -> NetworkResult<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_loop_v4(config.loopback)?;
    socket.set_multicast_ttl_v4(u32::from(config.ttl))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    socket.bind(&bind_addr.into())?;

    let group: Ipv4Addr = config
        .address
        .parse()
        .map_err(|_| NetworkError::Fatal(ErrorType::AddrParse))?;
    let interface = Ipv4Addr::UNSPECIFIED;
    socket.join_multicast_v4(&group, &interface)?;

    let sock_ref = SockRef::from(&socket);
    sock_ref.set_recv_buffer_size(config.socket_buffer_size as usize)?;
    sock_ref.set_send_buffer_size(config.socket_buffer_size as usize)?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(Duration::from_secs(u64::from(config.client_read_timeout_secs))))?;
    Ok(socket)
}

pub struct MulticastTransport {
    socket: UdpSocket,
    group: SocketAddr,
    config: MulticastConfig,
    role: MulticastRole,
    log: Logger,
}

impl MulticastTransport {
    pub fn open(config: &MulticastConfig, role: MulticastRole, log: &Logger) -> NetworkResult<MulticastTransport> {
        let socket = bind_multicast_socket(config)?;
        let group_addr: Ipv4Addr = config
            .address
            .parse()
            .map_err(|_| NetworkError::Fatal(ErrorType::AddrParse))?;
        let group = SocketAddr::from((group_addr, config.port));

        logging::debug!(log, "multicast group joined"; "address" => &config.address, "port" => config.port);

        Ok(MulticastTransport {
            socket,
            group,
            config: config.clone(),
            role,
            log: log.clone(),
        })
    }

    fn send_chunked(&self, payload: &[u8]) -> NetworkResult<()> {
        for chunk in chunk_payload(payload, self.config.max_length as usize) {
            self.socket.send_to(chunk, self.group)?;
        }
        Ok(())
    }

    fn recv_exact_len(&self, buf: &mut [u8]) -> NetworkResult<()> {
        let mut received = 0;
        while received < buf.len() {
            let remaining = self.config.max_length.min((buf.len() - received) as u32) as usize;
            let n = self.socket.recv(&mut buf[received..received + remaining])?;
            if n == 0 {
                return Err(NetworkError::Fatal(ErrorType::ConnectionClosed));
            }
            received += n;
        }
        Ok(())
    }
}

impl Transport for MulticastTransport {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.send_chunked(bytes)
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        self.recv_exact_len(buf)
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.send_chunked(bytes)
    }

    fn recv_from_slave(&mut self, _index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        self.recv_exact_len(buf)
    }

    /// Mirrors `Stream`'s gather-then-release barrier: slaves send one
    /// arrival byte each, the master reads one such datagram per slave,
    /// then releases everyone with a single multicast send. The group
    /// gives no way to address one sender, so unlike `Stream` the
    /// master cannot validate which rank each arrival came from — it
    /// only counts them.
    fn barrier(&mut self) -> NetworkResult<()> {
        match self.role {
            MulticastRole::Master { num_slaves } => {
                let mut arrival = [0u8; 1];
                for _ in 0..num_slaves {
                    self.recv_exact_len(&mut arrival)?;
                }
                logging::trace!(self.log, "multicast barrier: release"; "num_slaves" => num_slaves);
                self.send_chunked(b"g")
            }
            MulticastRole::Slave { rank } => {
                logging::trace!(self.log, "multicast barrier: arrive"; "rank" => rank);
                self.send_chunked(&[rank as u8])?;
                let mut release = [0u8; 1];
                self.recv_exact_len(&mut release)
            }
        }
    }

    fn self_framed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn loopback_config(port: u16) -> MulticastConfig {
        MulticastConfig {
            address: "239.7.7.7".to_string(),
            port,
            loopback: true,
            ..MulticastConfig::default()
        }
    }

    #[test]
    fn barrier_gathers_one_arrival_then_releases_everyone() {
        let log = logging::root_logger(false);
        let config = loopback_config(23290);

        let mut master = MulticastTransport::open(&config, MulticastRole::Master { num_slaves: 1 }, &log).unwrap();
        let mut slave = MulticastTransport::open(&config, MulticastRole::Slave { rank: 1 }, &log).unwrap();

        let slave_thread = thread::spawn(move || slave.barrier());
        master.barrier().unwrap();
        slave_thread.join().unwrap().unwrap();
    }

    #[test]
    fn chunk_payload_splits_into_ceil_division_chunks() {
        let payload = b"abcdefghij";
        let chunks = chunk_payload(payload, 4);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], b"abcd");
        assert_eq!(chunks[1], b"efgh");
        assert_eq!(chunks[2], b"ij");

        let reassembled: Vec<u8> = chunks.concat();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn chunk_payload_of_empty_slice_yields_one_empty_chunk() {
        let chunks = chunk_payload(&[], 4);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
