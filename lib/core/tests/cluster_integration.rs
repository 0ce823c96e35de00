use clustersync_core::gather::SlaveGatherBuffer;
use clustersync_core::Controller;
use clustersync_proto::logging::root_logger;
use clustersync_proto::role::Channel;
use clustersync_proto::{ClusterConfig, Message};
use std::thread;
use std::time::Duration;

fn stream_config(num_slaves: u32) -> ClusterConfig {
    ClusterConfig {
        num_slaves,
        ..ClusterConfig::default()
    }
}

/// 1 master + 2 slaves over loopback TCP: a broadcast int round-trips
/// byte-identical, and a heartbeat afterwards agrees on both slaves.
#[test]
fn stream_broadcast_and_heartbeat_across_two_slaves() {
    let log = root_logger(false);
    let port = 23400;

    let master_config = stream_config(2);
    let master_log = log.clone();
    let master_thread = thread::spawn(move || Controller::new_master(&master_config, "127.0.0.1", port, &master_log));

    thread::sleep(Duration::from_millis(50));

    let slave_configs = (stream_config(2), stream_config(2));
    let log1 = log.clone();
    let log2 = log.clone();
    let slave1_thread = thread::spawn(move || Controller::new_slave(&slave_configs.0, 1, "127.0.0.1", port, &log1));
    let slave2_thread = thread::spawn(move || Controller::new_slave(&slave_configs.1, 2, "127.0.0.1", port, &log2));

    let mut master = master_thread.join().unwrap().unwrap();
    let mut slave1 = slave1_thread.join().unwrap().unwrap();
    let mut slave2 = slave2_thread.join().unwrap().unwrap();

    let mut master_value = 0xDEADBEEFu32 as i32;
    let master_send = thread::spawn(move || {
        master.broadcast_i32(Channel::App, &mut master_value).unwrap();
        master.heart_beat("scenario1", Channel::App).unwrap();
        master
    });

    let mut value1 = 0i32;
    let mut value2 = 0i32;
    slave1.broadcast_i32(Channel::App, &mut value1).unwrap();
    slave2.broadcast_i32(Channel::App, &mut value2).unwrap();

    assert_eq!(value1 as u32, 0xDEADBEEF);
    assert_eq!(value2 as u32, 0xDEADBEEF);

    slave1.heart_beat("scenario1", Channel::App).unwrap();
    slave2.heart_beat("scenario1", Channel::App).unwrap();

    master_send.join().unwrap();
}

/// 1 master + 3 slaves: each slave reports a single distinct byte and the
/// master's gather buffer reads them back without interleaving.
#[test]
fn gather_reads_one_byte_per_slave_in_rank_order() {
    let log = root_logger(false);
    let port = 23410;

    let master_config = stream_config(3);
    let master_log = log.clone();
    let master_thread = thread::spawn(move || Controller::new_master(&master_config, "127.0.0.1", port, &master_log));

    thread::sleep(Duration::from_millis(50));

    let mut slave_threads = Vec::new();
    for rank in 1..=3u32 {
        let config = stream_config(3);
        let log = log.clone();
        slave_threads.push(thread::spawn(move || {
            let mut slave = Controller::new_slave(&config, rank, "127.0.0.1", port, &log).unwrap();
            let byte = b'A' + (rank as u8 - 1);
            slave.send_to_master(Channel::App, &[byte]).unwrap();
        }));
        // stagger so the master accepts connections in rank order
        thread::sleep(Duration::from_millis(20));
    }

    let mut master = master_thread.join().unwrap().unwrap();
    let mut buffer = SlaveGatherBuffer::new(3, 1);
    master.gather_from_slaves(Channel::App, &mut buffer).unwrap();

    for thread in slave_threads {
        thread.join().unwrap();
    }

    assert_eq!(buffer.slot(0), b"A");
    assert_eq!(buffer.slot(1), b"B");
    assert_eq!(buffer.slot(2), b"C");
}

/// A framed message round-trips sender rank, send kind, type tag and
/// payload exactly.
#[test]
fn framed_message_round_trips_header_and_payload() {
    let log = root_logger(false);
    let port = 23420;

    let master_config = stream_config(1);
    let master_log = log.clone();
    let master_thread = thread::spawn(move || Controller::new_master(&master_config, "127.0.0.1", port, &master_log));

    thread::sleep(Duration::from_millis(50));

    let slave_config = stream_config(1);
    let mut slave = Controller::new_slave(&slave_config, 1, "127.0.0.1", port, &log).unwrap();
    let mut master = master_thread.join().unwrap().unwrap();

    let master_thread = thread::spawn(move || {
        let mut outgoing = Some(Message::new(0, 42, 7, b"hello".to_vec()));
        master.broadcast_message(Channel::App, &mut outgoing).unwrap();
    });

    let received = slave.broadcast_message(Channel::App, &mut None).unwrap();

    master_thread.join().unwrap();

    assert_eq!(received.sender_rank, 0);
    assert_eq!(received.send_kind, 42);
    assert_eq!(received.type_tag, 7);
    assert_eq!(received.payload, b"hello");
}
