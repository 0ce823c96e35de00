//! Thin wrapper around `slog`/`sloggers` so every crate in the workspace logs
//! through the same root logger shape: a terminal drain by default, with
//! rank and role baked in as permanent key-value context.

pub use slog::{debug, error, info, o, trace, warn, Logger};

use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Builds the process-wide root logger.
///
/// `verbose` raises the level from `info` to `debug`, mirroring the
/// original core's `debugLevel()` checks sprinkled through the sync path.
pub fn root_logger(verbose: bool) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if verbose { Severity::Debug } else { Severity::Info });
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build root logger")
}

/// Attaches rank/role context that every subsequent log line from this
/// logger will carry, so a multi-process run can be demultiplexed from
/// interleaved stderr output alone.
pub fn with_node_context(log: &Logger, rank: u32, role: &str) -> Logger {
    log.new(o!("rank" => rank, "role" => role.to_string()))
}
