//! Telemetry: logging setup and datapath counters.
//!
//! Provides:
//! - Logging initialization from the `[log]` config section or `RUST_LOG`
//! - Relaxed atomic and per-CPU sharded counters
//! - Per-namespace and per-interface statistics

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{
    Counter, InterfaceStats, NamespaceStats, PacketCounters, PacketTotals, PerCpuCounter,
};
pub(crate) use logging::is_known_level;
