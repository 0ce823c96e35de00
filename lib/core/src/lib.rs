#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Owns the active `Transport` back-end, the slave table, and the
//! per-frame barrier protocol that keeps a tightly-coupled display
//! cluster advancing in lock-step.

pub mod bus;
pub mod controller;
pub mod gather;
pub mod stats;

pub use bus::ExternalBusClient;
pub use controller::Controller;
pub use gather::SlaveGatherBuffer;
pub use stats::StatisticsSink;
