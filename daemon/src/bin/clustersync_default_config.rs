use clustersync_proto::ClusterConfig;

fn main() {
    let config = ClusterConfig::default().to_toml_string().expect("failed to render default configuration");

    println!("{}", config);
}
