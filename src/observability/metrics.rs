//! Prometheus metrics for purge passes.
//!
//! Provides metrics for:
//! - Records deleted (or counted, on dry runs)
//! - Asset removal failures
//! - Pass errors and duration
//! - Passes skipped because another node held the lease

#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use crate::config::MetricsConfig;

#[cfg(feature = "prometheus")]
static INSTALLED: OnceLock<()> = OnceLock::new();

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a tokio runtime; the listener runs on it.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    if INSTALLED.get().is_some() {
        return Err(MetricsError::Setup("Metrics already initialized".to_string()));
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_address)
        .set_buckets_for_metric(
            Matcher::Suffix("_duration_seconds".to_string()),
            &config.duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()?;

    let _ = INSTALLED.set(());
    tracing::info!(address = %config.listen_address, "Prometheus metrics listener started");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!("Metrics are enabled but the 'prometheus' feature is not compiled in");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record records deleted by a batch.
///
/// # Arguments
/// * `mode` - `"live"` or `"dry_run"`; dry runs count candidates only
/// * `count` - The number of records
pub fn record_records_deleted(mode: &str, count: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!("purge_records_deleted_total", "mode" => mode.to_string()).increment(count);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (mode, count);
    }
}

/// Record asset directories that could not be removed.
pub fn record_asset_failures(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        if count > 0 {
            counter!("purge_asset_failures_total").increment(count);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = count;
    }
}

/// Record a pass that failed at `stage` (e.g. "index", "scan", "purge").
pub fn record_pass_error(stage: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("purge_pass_errors_total", "stage" => stage.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = stage;
    }
}

/// Record the duration of a finished pass.
pub fn record_pass_duration(outcome: &str, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        histogram!("purge_pass_duration_seconds", "outcome" => outcome.to_string())
            .record(duration_secs);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (outcome, duration_secs);
    }
}

/// Record a trigger skipped because the lease was held elsewhere.
pub fn record_gate_skipped() {
    #[cfg(feature = "prometheus")]
    {
        counter!("purge_gate_skipped_total").increment(1);
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        record_records_deleted("dry_run", 3);
        record_asset_failures(0);
        record_pass_error("scan");
        record_pass_duration("completed", 0.5);
        record_gate_skipped();
    }
}
