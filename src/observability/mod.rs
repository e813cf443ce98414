//! Observability: structured logging and Prometheus metrics.
//!
//! - Logging via `tracing-subscriber` in pretty, compact or JSON format
//! - Optional Prometheus scrape endpoint (feature `prometheus`)

pub mod metrics;
mod tracing_init;

pub use tracing_init::*;
