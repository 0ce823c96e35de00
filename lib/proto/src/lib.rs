#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

/// Identifies the wire protocol to peers; bumped whenever the header layout changes.
pub const PROTOCOL_ID: u16 = 0x0a55;

pub mod config;
pub mod error;
pub mod header;
pub mod logging;
pub mod role;
pub mod time;

pub use config::ClusterConfig;
pub use error::{ErrorType, NetworkError, NetworkResult};
pub use header::{Header, Message, HEADER_SIZE};
pub use role::{Channel, Rank, Role, SyncMode, SyncProcess};
