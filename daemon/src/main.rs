use clap::{App, Arg};
use clustersync_core::bus::BusRelay;
use clustersync_core::stats::{SampleCounters, StatisticsSink};
use clustersync_core::{Controller, ExternalBusClient};
use clustersync_proto::logging::{self, with_node_context};
use clustersync_proto::role::{Channel, Rank, Role};
use clustersync_proto::{ClusterConfig, Message};

/// Placeholder external bus client: a real deployment plugs in whatever
/// collaborative-editing transport feeds the cluster. Never reports a
/// pending message, so `sync_external_bus_messages` below is exercised
/// but never actually has anything to relay.
struct NullBusClient;

impl ExternalBusClient for NullBusClient {
    fn poll(&mut self) -> Option<Message> {
        None
    }

    fn is_disconnected(&self) -> bool {
        false
    }

    fn reconnect(&mut self) -> bool {
        true
    }
}

fn parse_args() -> clap::ArgMatches<'static> {
    App::new("clustersync-daemon")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Drives a cluster sync Controller for one node of a tightly-coupled display cluster.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the cluster configuration TOML file")
                .required(true),
        )
        .arg(
            Arg::with_name("rank")
                .long("rank")
                .takes_value(true)
                .help("Overrides this node's rank (0 = master, 1..N = slave)"),
        )
        .arg(
            Arg::with_name("master")
                .long("master")
                .conflicts_with("slave")
                .help("Run as the master (rank 0)"),
        )
        .arg(
            Arg::with_name("slave")
                .long("slave")
                .conflicts_with("master")
                .help("Run as a slave"),
        )
        .arg(
            Arg::with_name("addr")
                .long("addr")
                .takes_value(true)
                .default_value("127.0.0.1")
                .help("Master bind address (master) or connect address (slave)"),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .takes_value(true)
                .default_value("23230")
                .help("Base port; the draw channel uses port + 1"),
        )
        .arg(
            Arg::with_name("frames")
                .long("frames")
                .takes_value(true)
                .default_value("10")
                .help("Number of example frames to drive before exiting"),
        )
        .get_matches()
}

fn resolve_rank(matches: &clap::ArgMatches) -> Rank {
    if let Some(rank) = matches.value_of("rank") {
        return rank.parse().expect("--rank must be a non-negative integer");
    }
    if matches.is_present("master") {
        return 0;
    }
    if matches.is_present("slave") {
        panic!("--slave requires --rank to select which slave this node is");
    }
    0
}

fn main() {
    let matches = parse_args();

    let config_path = matches.value_of("CONFIG_FILE").expect("CONFIG_FILE is required");
    let config: ClusterConfig = ClusterConfig::load(config_path).expect("failed to load cluster configuration");

    let addr = matches.value_of("addr").expect("has a default");
    let port: u16 = matches.value_of("port").expect("has a default").parse().expect("--port must be a valid u16");
    let frame_count: i64 = matches.value_of("frames").expect("has a default").parse().expect("--frames must be an integer");

    let rank = resolve_rank(&matches);
    let role = Role::from_rank(rank);

    let root_log = logging::root_logger(false);
    let log = with_node_context(&root_log, rank, if role.is_master() { "master" } else { "slave" });

    let mut controller = match role {
        Role::Master => Controller::new_master(&config, addr, port, &log).expect("failed to construct master Controller"),
        Role::Slave => Controller::new_slave(&config, rank, addr, port, &log).expect("failed to construct slave Controller"),
    };

    logging::info!(log, "controller constructed"; "active_mode" => ?controller.active_mode());

    let mut sample_counters = SampleCounters::new();
    let mut stats_sink = StatisticsSink::new(config.num_slaves as usize);
    let mut bus_relay = BusRelay::new(&log);
    let mut bus_client = NullBusClient;

    for frame in 0..frame_count {
        controller.sync_app(frame).expect("frame number divergence");
        controller.sync_draw().expect("draw barrier failed");

        let gather_stats = config.statistics && config.num_slaves > 0;
        let time_sample = controller
            .sync_time(&mut sample_counters, gather_stats.then_some(&mut stats_sink))
            .expect("time sync failed");

        if gather_stats && role.is_master() {
            logging::debug!(log, "frame timing"; "frame" => frame, "dt" => time_sample.frame_dt,
                "global_max_dt" => stats_sink.global_max().frame_dt);
        }

        if role.is_master() {
            let relayed = bus_relay.drain(&mut bus_client, std::time::Instant::now());
            if !relayed.is_empty() {
                logging::info!(log, "relaying external bus messages"; "count" => relayed.len());
            }
        }

        controller.heart_beat("frame", Channel::App).expect("heartbeat divergence");
    }

    logging::info!(log, "example frame loop complete"; "frames" => frame_count);
}
