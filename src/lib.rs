//! logwarden: a log retention daemon.
//!
//! Periodically compresses aged log files from a directory into per-day
//! zip archives and purges archives past their retention period.

pub mod config;
pub mod observability;
pub mod retention;

#[cfg(test)]
mod tests;
