//! Observability: structured logging and optional counters.
//!
//! - Logging through `tracing`, to stderr and optionally a daily log file
//! - Retention counters through the `metrics` facade (feature `metrics`)

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
