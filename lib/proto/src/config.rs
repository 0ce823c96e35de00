use crate::role::{SyncMode, SyncProcess};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The 21 reliable-multicast tuning knobs from `[cluster.multicast]`. Only
/// consulted when `sync_mode = "reliable_multicast"`; every other mode
/// ignores this table entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MulticastConfig {
    pub debug_level: u8,
    pub address: String,
    pub port: u16,
    pub interface: Option<String>,
    pub mtu: u32,
    pub ttl: u8,
    pub loopback: bool,
    pub buffer_space: u32,
    pub block_size: u32,
    pub num_parity: u32,
    pub tx_cache_size: u32,
    pub tx_cache_min: u32,
    pub tx_cache_max: u32,
    pub tx_rate: u32,
    pub backoff_factor: f64,
    pub socket_buffer_size: u32,
    pub client_read_timeout_secs: u32,
    pub server_write_timeout_millis: u32,
    pub retry_timeout_millis: u32,
    /// Outbound messages longer than this are split into chunks of this
    /// size, with a final, shorter chunk carrying the remainder.
    pub max_length: u32,
}

impl Default for MulticastConfig {
    fn default() -> MulticastConfig {
        MulticastConfig {
            debug_level: 0,
            address: "239.0.0.1".to_string(),
            port: 23232,
            interface: None,
            mtu: 1500,
            ttl: 1,
            loopback: false,
            buffer_space: 1_000_000,
            block_size: 4,
            num_parity: 0,
            tx_cache_size: 100_000_000,
            tx_cache_min: 1,
            tx_cache_max: 128,
            tx_rate: 1000,
            backoff_factor: 0.0,
            socket_buffer_size: 512_000,
            client_read_timeout_secs: 30,
            server_write_timeout_millis: 500,
            retry_timeout_millis: 500,
            max_length: 1024 * 1024,
        }
    }
}

/// Configuration record the `Controller` is constructed from. Everything
/// here is read once, at start-up; nothing in this struct is mutated after
/// a `Controller` has been built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterConfig {
    pub sync_mode: SyncMode,
    pub sync_process: SyncProcess,
    pub num_slaves: u32,
    pub serial_device: Option<String>,
    pub parallel_device: Option<String>,
    pub statistics: bool,
    pub multicast: MulticastConfig,
}

impl Default for ClusterConfig {
    fn default() -> ClusterConfig {
        ClusterConfig {
            sync_mode: SyncMode::Stream,
            sync_process: SyncProcess::BarrierOnDraw,
            num_slaves: 0,
            serial_device: None,
            parallel_device: None,
            statistics: false,
            multicast: MulticastConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Loads a `[cluster]` section from a TOML file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ClusterConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }

    pub fn to_toml_string(&self) -> Result<String, serdeconv::Error> {
        serdeconv::to_toml_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = ClusterConfig::default();
        let toml = config.to_toml_string().unwrap();
        let parsed: ClusterConfig = serdeconv::from_toml_str(&toml).unwrap();

        assert_eq!(parsed.sync_mode, config.sync_mode);
        assert_eq!(parsed.sync_process, config.sync_process);
        assert_eq!(parsed.num_slaves, config.num_slaves);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClusterConfig::default();
        assert_eq!(config.sync_mode, SyncMode::Stream);
        assert_eq!(config.sync_process, SyncProcess::BarrierOnDraw);
        assert_eq!(config.multicast.max_length, 1024 * 1024);
    }
}
