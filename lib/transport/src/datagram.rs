//! Plain UDP back-end. No reassembly, no barrier: ordering across
//! `send_to_all` calls is explicitly not guaranteed in this mode, so
//! `barrier()` is a documented no-op rather than a silent one.

use clustersync_proto::logging::{self, Logger};
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use std::net::{SocketAddr, UdpSocket};

use crate::transport::Transport;

const MAX_DATAGRAM: usize = 65_507;

pub struct DatagramClient {
    socket: UdpSocket,
    log: Logger,
}

impl DatagramClient {
    pub fn connect(addr: &str, port: u16, log: &Logger) -> NetworkResult<DatagramClient> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect((addr, port))?;
        logging::debug!(log, "datagram client connected"; "addr" => addr, "port" => port);
        Ok(DatagramClient {
            socket,
            log: log.clone(),
        })
    }
}

impl Transport for DatagramClient {
    fn send_to_all(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("send_to_all is master-only");
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        let received = self.socket.recv(buf)?;
        if received != buf.len() {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        Ok(())
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        self.socket.send(bytes)?;
        Ok(())
    }

    fn recv_from_slave(&mut self, _index: usize, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("recv_from_slave is master-only");
    }

    /// Datagram mode has no ordering guarantees between nodes; a barrier
    /// here would be a false promise, so this is intentionally a no-op.
    fn barrier(&mut self) -> NetworkResult<()> {
        logging::trace!(self.log, "datagram barrier is a no-op by design");
        Ok(())
    }
}

pub struct DatagramServer {
    socket: UdpSocket,
    slaves: Vec<SocketAddr>,
    log: Logger,
}

impl DatagramServer {
    /// Binds and waits for one datagram from each slave to learn its
    /// return address, in rank order.
    pub fn listen(bind_addr: &str, port: u16, num_slaves: usize, log: &Logger) -> NetworkResult<DatagramServer> {
        let socket = UdpSocket::bind((bind_addr, port))?;
        let mut slaves = Vec::with_capacity(num_slaves);
        let mut hello = [0u8; 1];

        for _ in 0..num_slaves {
            let (_, peer) = socket.recv_from(&mut hello)?;
            logging::debug!(log, "datagram server learned slave address"; "peer" => ?peer, "rank" => slaves.len() + 1);
            slaves.push(peer);
        }

        Ok(DatagramServer {
            socket,
            slaves,
            log: log.clone(),
        })
    }
}

impl Transport for DatagramServer {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        for slave in &self.slaves {
            self.socket.send_to(bytes, slave)?;
        }
        Ok(())
    }

    fn recv_from_master(&mut self, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("recv_from_master is slave-only");
    }

    fn send_to_master(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("send_to_master is slave-only");
    }

    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        let (received, peer) = self.socket.recv_from(buf)?;
        if peer != self.slaves[index] {
            return Err(NetworkError::Fatal(ErrorType::Divergence {
                rank: index as u32,
                expected: 0,
                actual: 0,
            }));
        }
        if received != buf.len() {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        Ok(())
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        logging::trace!(self.log, "datagram barrier is a no-op by design");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn master_broadcasts_bytes_identical_to_slave() {
        let log = logging::root_logger(false);
        let server = DatagramServer {
            socket: UdpSocket::bind("127.0.0.1:0").unwrap(),
            slaves: vec![],
            log: log.clone(),
        };
        let server_addr = server.socket.local_addr().unwrap();

        let client_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        client_socket.connect(server_addr).unwrap();
        client_socket.send(&[9u8]).unwrap();

        let mut server = server;
        let mut hello = [0u8; 1];
        let (_, peer) = server.socket.recv_from(&mut hello).unwrap();
        server.slaves.push(peer);

        server.send_to_all(&[1, 2, 3]).unwrap();
        thread::sleep(Duration::from_millis(10));

        let mut buf = [0u8; 3];
        let mut client = DatagramClient {
            socket: client_socket,
            log,
        };
        client.recv_from_master(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }
}
