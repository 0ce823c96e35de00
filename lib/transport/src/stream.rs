//! Point-to-point TCP back-end. One socket per slave per channel, so a
//! master with N slaves holds 2N connections (app + draw).

use clustersync_proto::logging::{self, Logger};
use clustersync_proto::{ErrorType, NetworkError, NetworkResult};
use socket2::{SockRef, TcpKeepalive};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use crate::transport::Transport;

/// Minimum socket send/receive buffer, raised via `socket2` on every
/// stream socket the cluster opens.
pub const MIN_SOCKET_BUF_SIZE: usize = 64 * 1024;

/// Raises a socket's send/receive buffers to `MIN_SOCKET_BUF_SIZE` and
/// enables `TCP_NODELAY`/keepalive. Applied to every stream socket this
/// back-end opens, on both the client and server side.
fn raise_buffers(stream: &TcpStream) -> io::Result<()> {
    let sock = SockRef::from(stream);
    sock.set_send_buffer_size(MIN_SOCKET_BUF_SIZE)?;
    sock.set_recv_buffer_size(MIN_SOCKET_BUF_SIZE)?;
    sock.set_nodelay(true)?;
    sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(Duration::from_secs(30)))?;
    Ok(())
}

/// Loops a partial I/O operation until `buf` is fully consumed, retrying
/// `WouldBlock`/`Interrupted` transparently.
fn full_io<F: FnMut(&mut [u8]) -> io::Result<usize>>(mut buf: &mut [u8], mut op: F) -> NetworkResult<()> {
    while !buf.is_empty() {
        match op(buf) {
            Ok(0) => return Err(NetworkError::Fatal(ErrorType::ConnectionClosed)),
            Ok(n) => buf = &mut buf[n..],
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Loops a write until every byte of `bytes` is accepted, retrying
/// `WouldBlock`/`Interrupted` transparently.
fn send_all(stream: &mut TcpStream, mut bytes: &[u8]) -> NetworkResult<()> {
    while !bytes.is_empty() {
        match stream.write(bytes) {
            Ok(0) => return Err(NetworkError::Fatal(ErrorType::ConnectionClosed)),
            Ok(n) => bytes = &bytes[n..],
            Err(err) if err.kind() == io::ErrorKind::WouldBlock || err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn recv_exact(stream: &mut TcpStream, buf: &mut [u8]) -> NetworkResult<()> {
    full_io(buf, |slice| stream.read(slice))
}

/// Slave-side stream transport: one connection to the master.
pub struct StreamClient {
    stream: TcpStream,
    rank: u32,
    log: Logger,
}

impl StreamClient {
    pub fn connect(addr: &str, port: u16, rank: u32, log: &Logger) -> NetworkResult<StreamClient> {
        let stream = TcpStream::connect((addr, port))?;
        stream.set_nonblocking(true)?;
        raise_buffers(&stream)?;

        logging::debug!(log, "stream client connected"; "addr" => addr, "port" => port);

        Ok(StreamClient {
            stream,
            rank,
            log: log.clone(),
        })
    }
}

impl Transport for StreamClient {
    fn send_to_all(&mut self, _bytes: &[u8]) -> NetworkResult<()> {
        panic!("send_to_all is master-only");
    }

    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        recv_exact(&mut self.stream, buf)
    }

    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        send_all(&mut self.stream, bytes)
    }

    fn recv_from_slave(&mut self, _index: usize, _buf: &mut [u8]) -> NetworkResult<()> {
        panic!("recv_from_slave is master-only");
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        logging::trace!(self.log, "stream barrier: arrive");
        self.send_to_master(&[self.rank as u8])?;
        let mut release = [0u8; 1];
        self.recv_from_master(&mut release)?;
        Ok(())
    }
}

/// Master-side stream transport: one connection per slave.
pub struct StreamServer {
    slaves: Vec<TcpStream>,
    log: Logger,
}

impl StreamServer {
    /// Opens a listening socket, accepts exactly `num_slaves` connections
    /// in rank order (rank 1 connects first), then drops the listener.
    pub fn listen(bind_addr: &str, port: u16, num_slaves: usize, log: &Logger) -> NetworkResult<StreamServer> {
        let listener = TcpListener::bind((bind_addr, port))?;
        let mut slaves = Vec::with_capacity(num_slaves);

        for _ in 0..num_slaves {
            let (stream, peer) = listener.accept()?;
            stream.set_nonblocking(true)?;
            raise_buffers(&stream)?;
            logging::debug!(log, "stream server accepted slave"; "peer" => ?peer, "rank" => slaves.len() + 1);
            slaves.push(stream);
        }

        Ok(StreamServer {
            slaves,
            log: log.clone(),
        })
    }
}

impl Transport for StreamServer {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        for slave in &mut self.slaves {
            send_all(slave, bytes)?;
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
        recv_exact(&mut self.slaves[index], buf)
    }

    fn barrier(&mut self) -> NetworkResult<()> {
        let mut arrival = [0u8; 1];
        for i in 0..self.slaves.len() {
            self.recv_from_slave(i, &mut arrival)?;
            let expected_rank = (i + 1) as u8;
            if arrival[0] != expected_rank {
                return Err(NetworkError::Fatal(ErrorType::Divergence {
                    rank: i as u32,
                    expected: expected_rank as i64,
                    actual: arrival[0] as i64,
                }));
            }
        }
        logging::trace!(self.log, "stream barrier: release"; "num_slaves" => self.slaves.len());
        self.send_to_all(b"g")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener as StdListener;
    use std::thread;

    fn free_port() -> u16 {
        StdListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn master_broadcasts_to_one_slave_over_loopback() {
        let port = free_port();
        let log = logging::root_logger(false);
        let log2 = log.clone();

        let server_thread = thread::spawn(move || StreamServer::listen("127.0.0.1", port, 1, &log));

        thread::sleep(Duration::from_millis(50));
        let mut client = StreamClient::connect("127.0.0.1", port, 1, &log2).unwrap();

        let mut server = server_thread.join().unwrap().unwrap();
        server.send_to_all(&[1, 2, 3, 4]).unwrap();

        let mut buf = [0u8; 4];
        client.recv_from_master(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn barrier_round_trips_arrival_and_release() {
        let port = free_port();
        let log = logging::root_logger(false);
        let log2 = log.clone();

        let server_thread = thread::spawn(move || StreamServer::listen("127.0.0.1", port, 1, &log));
        thread::sleep(Duration::from_millis(50));
        let mut client = StreamClient::connect("127.0.0.1", port, 1, &log2).unwrap();
        let mut server = server_thread.join().unwrap().unwrap();

        let client_thread = thread::spawn(move || client.barrier());
        server.barrier().unwrap();
        client_thread.join().unwrap().unwrap();
    }
}
