use byteorder::{BigEndian, ByteOrder};
use clustersync_proto::config::ClusterConfig;
use clustersync_proto::logging::{self, Logger};
use clustersync_proto::role::{Channel, Rank, Role, SyncMode};
use clustersync_proto::time::{timestamp_secs, FrameClock, TimeSample, TIME_SAMPLE_SIZE};
use clustersync_proto::{ErrorType, Header, Message, NetworkError, NetworkResult};
use clustersync_transport::datagram::{DatagramClient, DatagramServer};
use clustersync_transport::debug_framed::DebugFramed;
use clustersync_transport::magic::MagicDevice;
use clustersync_transport::multicast::{MulticastRole, MulticastTransport};
use clustersync_transport::serial::{SerialLine, SerialRole};
use clustersync_transport::stream::{StreamClient, StreamServer};
use clustersync_transport::stream_serial::StreamPlusSerial;
use clustersync_transport::Transport;
use std::time::Duration;

use crate::stats::{NodeSample, SampleCounters, StatisticsSink, NODE_SAMPLE_SIZE};

const RECV_CHUNK: usize = 64 * 1024;

/// Boxed per-channel back-end plus the bookkeeping the `Controller` needs
/// regardless of which mode is behind the box: a heartbeat counter and an
/// optional debug-framing wrapper is applied before boxing, not here.
struct ChannelState {
    transport: Box<dyn Transport>,
    heartbeat: u32,
}

/// Owns the selected transport back-end, the process role, and the
/// per-frame barrier protocol. Constructed once; rank and role are
/// immutable for its lifetime. There is no global Controller — callers
/// hold this value directly and pass it where it's needed.
pub struct Controller {
    rank: Rank,
    role: Role,
    num_slaves: usize,
    active_mode: SyncMode,
    sync_process: clustersync_proto::role::SyncProcess,
    app: ChannelState,
    draw: ChannelState,
    frame_number: i64,
    time_clock: FrameClock,
    log: Logger,
}

/// Resolves the requested mode to what can actually be constructed on
/// this platform/build, falling back to `SyncMode::FALLBACK` (Stream)
/// per the construction decision order in the component design.
fn resolve_mode(requested: SyncMode) -> SyncMode {
    match requested {
        #[cfg(not(target_os = "linux"))]
        SyncMode::ParallelPort => SyncMode::FALLBACK,
        #[cfg(not(feature = "mpi-backend"))]
        SyncMode::MessagePassing => SyncMode::FALLBACK,
        other => other,
    }
}

impl Controller {
    /// Constructs the master-side Controller: rank 0, owning the listen
    /// side of whichever back-end the configuration selects.
    pub fn new_master(config: &ClusterConfig, bind_addr: &str, port: u16, log: &Logger) -> NetworkResult<Controller> {
        let mode = resolve_mode(config.sync_mode);
        let num_slaves = config.num_slaves as usize;

        let (app, draw) = build_master_channels(mode, config, bind_addr, port, num_slaves, log)?;

        Ok(Controller {
            rank: 0,
            role: Role::Master,
            num_slaves,
            active_mode: mode,
            sync_process: config.sync_process,
            app: ChannelState { transport: app, heartbeat: 0 },
            draw: ChannelState { transport: draw, heartbeat: 0 },
            frame_number: 0,
            time_clock: FrameClock::new(),
            log: log.clone(),
        })
    }

    /// Constructs a slave-side Controller for the given `rank`, connecting
    /// to the master at `addr:port`.
    pub fn new_slave(config: &ClusterConfig, rank: Rank, addr: &str, port: u16, log: &Logger) -> NetworkResult<Controller> {
        let mode = resolve_mode(config.sync_mode);

        let (app, draw) = build_slave_channels(mode, config, rank, addr, port, log)?;

        Ok(Controller {
            rank,
            role: Role::Slave,
            num_slaves: 0,
            active_mode: mode,
            sync_process: config.sync_process,
            app: ChannelState { transport: app, heartbeat: 0 },
            draw: ChannelState { transport: draw, heartbeat: 0 },
            frame_number: 0,
            time_clock: FrameClock::new(),
            log: log.clone(),
        })
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn active_mode(&self) -> SyncMode {
        self.active_mode
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::App => &mut self.app,
            Channel::Draw => &mut self.draw,
        }
    }

    /// Master: sends `bytes` to every slave. Slave: receives into a
    /// buffer sized to `bytes.len()` and returns the received length.
    /// Both directions share one call so application code doesn't have
    /// to branch on role for a plain broadcast.
    pub fn broadcast(&mut self, channel: Channel, bytes: &mut [u8]) -> NetworkResult<usize> {
        let role = self.role;
        let state = self.channel_mut(channel);
        match role {
            Role::Master => {
                state.transport.send_to_all(bytes)?;
                Ok(bytes.len())
            }
            Role::Slave => {
                state.transport.recv_from_master(bytes)?;
                Ok(bytes.len())
            }
        }
    }

    pub fn broadcast_bool(&mut self, channel: Channel, value: &mut bool) -> NetworkResult<()> {
        let mut buf = [*value as u8];
        self.broadcast(channel, &mut buf)?;
        *value = buf[0] != 0;
        Ok(())
    }

    pub fn broadcast_i32(&mut self, channel: Channel, value: &mut i32) -> NetworkResult<()> {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, *value);
        self.broadcast(channel, &mut buf)?;
        *value = BigEndian::read_i32(&buf);
        Ok(())
    }

    pub fn broadcast_bytes(&mut self, channel: Channel, bytes: &mut [u8]) -> NetworkResult<()> {
        self.broadcast(channel, bytes).map(|_| ())
    }

    /// Slave only: sends `bytes` to the master. The other half of
    /// `gather_from_slaves`/`recv_from_slave`.
    pub fn send_to_master(&mut self, channel: Channel, bytes: &[u8]) -> NetworkResult<()> {
        assert_eq!(self.role, Role::Slave, "send_to_master is slave-only");
        self.channel_mut(channel).transport.send_to_master(bytes)
    }

    /// Master: transmits the 16-byte header then the payload. Slave:
    /// receives the header, allocates `payload_length` bytes, and fills
    /// them in chunks of `RECV_CHUNK`.
    pub fn broadcast_message(&mut self, channel: Channel, message: &mut Option<Message>) -> NetworkResult<Message> {
        let role = self.role;
        let state = self.channel_mut(channel);

        match role {
            Role::Master => {
                let outgoing = message.take().expect("master must supply a message to broadcast");
                let header = outgoing.header()?;
                state.transport.send_to_all(&header.to_bytes())?;
                state.transport.send_to_all(&outgoing.payload)?;
                Ok(outgoing)
            }
            Role::Slave => {
                let mut header_bytes = [0u8; clustersync_proto::HEADER_SIZE];
                state.transport.recv_from_master(&mut header_bytes)?;
                let header = Header::from_bytes(&header_bytes)?;

                let mut payload = vec![0u8; header.payload_length as usize];
                for chunk in payload.chunks_mut(RECV_CHUNK) {
                    state.transport.recv_from_master(chunk)?;
                }

                Ok(Message {
                    sender_rank: header.sender_rank,
                    send_kind: header.send_kind,
                    type_tag: header.type_tag,
                    payload,
                })
            }
        }
    }

    /// Master only: reads exactly `buffer.slot_size()` bytes from every
    /// slave in rank order into its slot.
    pub fn gather_from_slaves(&mut self, channel: Channel, buffer: &mut crate::gather::SlaveGatherBuffer) -> NetworkResult<()> {
        assert_eq!(self.role, Role::Master, "gather_from_slaves is master-only");
        let state = self.channel_mut(channel);

        for i in 0..buffer.num_slots() {
            state.transport.recv_from_slave(i, buffer.slot_mut(i))?;
        }
        Ok(())
    }

    pub fn recv_from_slave(&mut self, channel: Channel, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        assert_eq!(self.role, Role::Master, "recv_from_slave is master-only");
        self.channel_mut(channel).transport.recv_from_slave(index, buf)
    }

    /// Broadcasts `frame_number` and checks it for divergence on slaves;
    /// divergence is always fatal regardless of which channel the active
    /// barrier runs on. Then, if the barrier runs on the app channel,
    /// executes it.
    pub fn sync_app(&mut self, frame_number: i64) -> NetworkResult<()> {
        let mut value = frame_number;
        self.broadcast_i64(Channel::App, &mut value)?;

        if self.role == Role::Slave && value != frame_number {
            logging::error!(self.log, "frame number divergence detected";
                "rank" => self.rank, "expected" => frame_number, "actual" => value);
            return Err(NetworkError::Fatal(ErrorType::Divergence {
                rank: self.rank,
                expected: frame_number,
                actual: value,
            }));
        }

        self.frame_number = frame_number;

        if self.sync_process == clustersync_proto::role::SyncProcess::BarrierOnApp {
            self.run_barrier(Channel::App)?;
        }
        Ok(())
    }

    /// No-op with no slaves; otherwise runs the barrier on the draw
    /// channel.
    pub fn sync_draw(&mut self) -> NetworkResult<()> {
        if self.role == Role::Master && self.num_slaves == 0 {
            return Ok(());
        }
        self.run_barrier(Channel::Draw)
    }

    fn run_barrier(&mut self, channel: Channel) -> NetworkResult<()> {
        if self.active_mode == SyncMode::Magic && channel == Channel::App {
            return self.run_magic_barrier();
        }
        self.channel_mut(channel).transport.barrier()
    }

    /// Magic's app channel barrier is two halves with a stream round trip
    /// sandwiched between: the magic device's own ready/busy handshake
    /// signals readiness over the custom hardware link, which carries no
    /// payload, so the ack that confirms every node actually observed it
    /// rides the draw channel's stream connection instead.
    fn run_magic_barrier(&mut self) -> NetworkResult<()> {
        self.app.transport.begin_barrier()?;

        match self.role {
            Role::Master => {
                let mut ack = [0u8; 1];
                for i in 0..self.num_slaves {
                    self.draw.transport.recv_from_slave(i, &mut ack)?;
                }
            }
            Role::Slave => {
                self.draw.transport.send_to_master(&[1])?;
            }
        }

        self.app.transport.finish_barrier()
    }

    /// Broadcasts the master's latest frame delta and wall-clock
    /// timestamp on the app channel; every node's returned `TimeSample`
    /// agrees on both. When `sink` is given, additionally gathers each
    /// slave's `{frame_dt, bytes_sent, bytes_received}` sample (drained
    /// from `counters`) into it for per-node and cluster-wide statistics.
    pub fn sync_time(&mut self, counters: &mut SampleCounters, sink: Option<&mut StatisticsSink>) -> NetworkResult<TimeSample> {
        let mut buf = [0u8; TIME_SAMPLE_SIZE];

        if self.role == Role::Master {
            buf = TimeSample {
                frame_dt: self.time_clock.tick(),
                wall_clock_secs: timestamp_secs(),
            }
            .to_bytes();
        }

        self.broadcast(Channel::App, &mut buf)?;
        let sample = TimeSample::from_bytes(&buf);

        if let Some(sink) = sink {
            match self.role {
                Role::Master => {
                    for i in 0..self.num_slaves {
                        let mut sample_buf = [0u8; NODE_SAMPLE_SIZE];
                        self.channel_mut(Channel::App).transport.recv_from_slave(i, &mut sample_buf)?;
                        sink.record(i, NodeSample::from_bytes(&sample_buf));
                    }
                }
                Role::Slave => {
                    let node_sample = counters.take(sample.frame_dt);
                    self.send_to_master(Channel::App, &node_sample.to_bytes())?;
                }
            }
        }

        Ok(sample)
    }

    fn broadcast_i64(&mut self, channel: Channel, value: &mut i64) -> NetworkResult<()> {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, *value);
        self.broadcast(channel, &mut buf)?;
        *value = BigEndian::read_i64(&buf);
        Ok(())
    }

    /// Increments the channel-local heartbeat counter, exchanges it with
    /// the peer(s), and aborts if the exchanged value doesn't match the
    /// local one. Used sparsely as a debug checkpoint distinct from the
    /// per-frame barrier.
    pub fn heart_beat(&mut self, name: &str, channel: Channel) -> NetworkResult<()> {
        let local = {
            let state = self.channel_mut(channel);
            state.heartbeat += 1;
            state.heartbeat
        };

        let mut value = local as i32;
        self.broadcast_i32(channel, &mut value)?;

        if self.role == Role::Slave && value as u32 != local {
            logging::error!(self.log, "heartbeat divergence detected";
                "name" => name, "rank" => self.rank, "expected" => local, "actual" => value);
            return Err(NetworkError::Fatal(ErrorType::Divergence {
                rank: self.rank,
                expected: local as i64,
                actual: value as i64,
            }));
        }

        Ok(())
    }

    /// Wraps the app and draw transports with the debug-framing decorator
    /// so every subsequent send/recv carries a length/sequence prefix.
    /// Consumes and replaces `self`; call before the first frame.
    pub fn with_debug_framing(self) -> Controller {
        let log = self.log.clone();
        Controller {
            app: ChannelState {
                transport: Box::new(DebugFramed::new(BoxedTransport(self.app.transport), &log)),
                heartbeat: self.app.heartbeat,
            },
            draw: ChannelState {
                transport: Box::new(DebugFramed::new(BoxedTransport(self.draw.transport), &log)),
                heartbeat: self.draw.heartbeat,
            },
            ..self
        }
    }
}

/// Adapts a boxed trait object back into a concrete `Transport` impl so
/// it can be wrapped by `DebugFramed<T: Transport>`.
struct BoxedTransport(Box<dyn Transport>);

impl Transport for BoxedTransport {
    fn send_to_all(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.0.send_to_all(bytes)
    }
    fn recv_from_master(&mut self, buf: &mut [u8]) -> NetworkResult<()> {
        self.0.recv_from_master(buf)
    }
    fn send_to_master(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        self.0.send_to_master(bytes)
    }
    fn recv_from_slave(&mut self, index: usize, buf: &mut [u8]) -> NetworkResult<()> {
        self.0.recv_from_slave(index, buf)
    }
    fn barrier(&mut self) -> NetworkResult<()> {
        self.0.barrier()
    }
    fn begin_barrier(&mut self) -> NetworkResult<()> {
        self.0.begin_barrier()
    }
    fn finish_barrier(&mut self) -> NetworkResult<()> {
        self.0.finish_barrier()
    }
    fn self_framed(&self) -> bool {
        self.0.self_framed()
    }
}

fn build_master_channels(
    mode: SyncMode,
    config: &ClusterConfig,
    bind_addr: &str,
    port: u16,
    num_slaves: usize,
    log: &Logger,
) -> NetworkResult<(Box<dyn Transport>, Box<dyn Transport>)> {
    match mode {
        SyncMode::Stream | SyncMode::StreamPlusSerial => {
            let app = StreamServer::listen(bind_addr, port, num_slaves, log)?;
            let draw = StreamServer::listen(bind_addr, port + 1, num_slaves, log)?;

            if mode == SyncMode::StreamPlusSerial {
                let device = config.serial_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
                let serial_draw = SerialLine::open(device, SerialRole::Master, log)?;
                Ok((Box::new(app), Box::new(StreamPlusSerial::new(draw, serial_draw))))
            } else {
                Ok((Box::new(app), Box::new(draw)))
            }
        }
        SyncMode::Datagram => {
            let app = DatagramServer::listen(bind_addr, port, num_slaves, log)?;
            let draw = DatagramServer::listen(bind_addr, port + 1, num_slaves, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::ReliableMulticast => {
            let role = MulticastRole::Master { num_slaves };
            let app = MulticastTransport::open(&config.multicast, role, log)?;
            let draw = MulticastTransport::open(&config.multicast, role, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::Magic => {
            let device = config.serial_device.as_deref().unwrap_or("/dev/clustersync-magic");
            let app = MagicDevice::open(device, log)?;
            let draw = StreamServer::listen(bind_addr, port + 1, num_slaves, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::SerialLine => {
            let device = config.serial_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
            let app = SerialLine::open(device, SerialRole::Master, log)?;
            let draw_device = config.serial_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
            let draw = SerialLine::open(draw_device, SerialRole::Master, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        #[cfg(target_os = "linux")]
        SyncMode::ParallelPort => {
            let device = config.parallel_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
            let app = clustersync_transport::parallel::ParallelPort::open(device, None, num_slaves, log)?;
            let draw = StreamServer::listen(bind_addr, port + 1, num_slaves, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        #[cfg(feature = "mpi-backend")]
        SyncMode::MessagePassing => {
            // Message-passing ranks are queried from the communicator at
            // start-up rather than from configuration; the daemon entry
            // point owns the `mpi::Universe` and constructs the transport
            // directly, so this arm only exists for exhaustiveness.
            Err(NetworkError::Fatal(ErrorType::ModeUnavailable))
        }
        _ => Err(NetworkError::Fatal(ErrorType::ModeUnavailable)),
    }
}

fn build_slave_channels(
    mode: SyncMode,
    config: &ClusterConfig,
    rank: Rank,
    addr: &str,
    port: u16,
    log: &Logger,
) -> NetworkResult<(Box<dyn Transport>, Box<dyn Transport>)> {
    match mode {
        SyncMode::Stream | SyncMode::StreamPlusSerial => {
            let app = StreamClient::connect(addr, port, rank, log)?;
            let draw = StreamClient::connect(addr, port + 1, rank, log)?;

            if mode == SyncMode::StreamPlusSerial {
                let device = config.serial_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
                let serial_draw = SerialLine::open(device, SerialRole::Slave, log)?;
                Ok((Box::new(app), Box::new(StreamPlusSerial::new(draw, serial_draw))))
            } else {
                Ok((Box::new(app), Box::new(draw)))
            }
        }
        SyncMode::Datagram => {
            let app = DatagramClient::connect(addr, port, log)?;
            let draw = DatagramClient::connect(addr, port + 1, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::ReliableMulticast => {
            let role = MulticastRole::Slave { rank };
            let app = MulticastTransport::open(&config.multicast, role, log)?;
            let draw = MulticastTransport::open(&config.multicast, role, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::Magic => {
            let device = config.serial_device.as_deref().unwrap_or("/dev/clustersync-magic");
            let app = MagicDevice::open(device, log)?;
            let draw = StreamClient::connect(addr, port + 1, rank, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        SyncMode::SerialLine => {
            let device = config.serial_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
            let app = SerialLine::open(device, SerialRole::Slave, log)?;
            let draw = SerialLine::open(device, SerialRole::Slave, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        #[cfg(target_os = "linux")]
        SyncMode::ParallelPort => {
            let device = config.parallel_device.as_deref().ok_or(NetworkError::Fatal(ErrorType::ModeUnavailable))?;
            let app = clustersync_transport::parallel::ParallelPort::open(device, Some((rank - 1) as usize), 0, log)?;
            let draw = StreamClient::connect(addr, port + 1, rank, log)?;
            Ok((Box::new(app), Box::new(draw)))
        }
        _ => Err(NetworkError::Fatal(ErrorType::ModeUnavailable)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clustersync_proto::logging::root_logger;
    use std::thread;

    fn test_config() -> ClusterConfig {
        ClusterConfig {
            num_slaves: 1,
            ..ClusterConfig::default()
        }
    }

    #[test]
    fn stream_master_and_slave_exchange_a_broadcast() {
        let config = test_config();
        let log = root_logger(false);

        let master_log = log.clone();
        let master_config = config.clone();
        let master_thread = thread::spawn(move || Controller::new_master(&master_config, "127.0.0.1", 17800, &master_log));

        // give the listener a moment to bind before the slave connects
        thread::sleep(Duration::from_millis(50));
        let slave_config = config.clone();
        let mut slave = Controller::new_slave(&slave_config, 1, "127.0.0.1", 17800, &log).unwrap();

        let mut master = master_thread.join().unwrap().unwrap();

        let mut buf = [0xDE, 0xAD, 0xBE, 0xEF];
        master.broadcast(Channel::App, &mut buf).unwrap();

        let mut received = [0u8; 4];
        slave.broadcast(Channel::App, &mut received).unwrap();
        assert_eq!(received, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn divergent_frame_number_is_rejected_on_the_slave() {
        let config = test_config();
        let log = root_logger(false);

        let master_log = log.clone();
        let master_config = config.clone();
        let master_thread = thread::spawn(move || Controller::new_master(&master_config, "127.0.0.1", 17802, &master_log));

        thread::sleep(Duration::from_millis(50));
        let slave_config = config.clone();
        let mut slave = Controller::new_slave(&slave_config, 1, "127.0.0.1", 17802, &log).unwrap();
        let mut master = master_thread.join().unwrap().unwrap();

        let master_thread = thread::spawn(move || master.sync_app(100));
        let slave_result = slave.sync_app(101);

        master_thread.join().unwrap().unwrap();
        assert!(matches!(
            slave_result,
            Err(NetworkError::Fatal(ErrorType::Divergence { .. }))
        ));
    }
}
