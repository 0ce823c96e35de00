#![allow(clippy::len_without_is_empty)]
#![allow(clippy::new_without_default)]

//! Back-end implementations of the `Transport` contract, one module per
//! `SyncMode`. The `Controller` in `clustersync-core` selects one of these
//! at construction and never branches on the mode again afterwards.

pub mod datagram;
pub mod debug_framed;
pub mod magic;
pub mod multicast;
pub mod serial;
pub mod stream;
pub mod stream_serial;
pub mod transport;

#[cfg(target_os = "linux")]
pub mod parallel;

#[cfg(feature = "mpi-backend")]
pub mod mpi_backend;

pub use transport::Transport;
