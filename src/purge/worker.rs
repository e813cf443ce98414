//! Background trigger for purge passes.
//!
//! Runs an optional startup pass and then follows an optional cron schedule.
//! Each pass goes through the cluster gate and is awaited before the next
//! trigger is considered, so passes never overlap within a process.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::runner::{Purger, PurgeError, RunSummary};
use crate::{
    config::{ConfigError, PurgeConfig},
    lock::{ClusterGate, LockError},
    observability::metrics,
};

/// When passes are triggered.
#[derive(Debug, Clone)]
pub struct PurgeSchedule {
    pub run_on_startup: bool,
    pub startup_delay: Duration,
    pub cron: Option<cron::Schedule>,
}

impl PurgeSchedule {
    pub fn from_config(config: &PurgeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            run_on_startup: config.run_on_startup,
            startup_delay: config.startup_delay(),
            cron: config.schedule()?,
        })
    }

    pub fn is_idle(&self) -> bool {
        !self.run_on_startup && self.cron.is_none()
    }

    /// Next scheduled run strictly after `now`.
    ///
    /// The cron fields are read against the host's local clock, so
    /// `0 15 6 * * *` fires at 06:15 wall time across DST changes.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.cron
            .as_ref()?
            .after(&now.with_timezone(&Local))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

/// A triggered pass that did not produce a summary.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Lease backend error: {0}")]
    Lock(#[from] LockError),

    #[error(transparent)]
    Purge(#[from] PurgeError),
}

/// Run one pass if this node can take the lease.
///
/// Returns `Ok(None)` when another node holds it.
pub async fn run_gated_pass(
    purger: &Purger,
    gate: &ClusterGate,
    cancel: &CancellationToken,
) -> Result<Option<RunSummary>, TriggerError> {
    let output = gate
        .try_run_exclusively(cancel, |token| async move { purger.run_pass(&token).await })
        .await?;

    match output {
        Some(result) => Ok(Some(result?)),
        None => {
            metrics::record_gate_skipped();
            tracing::debug!(lease = %gate.name(), "Purge pass skipped, lease held by another node");
            Ok(None)
        }
    }
}

/// Starts the purge trigger loop as a background task.
///
/// Returns once no further passes are scheduled or `shutdown` is cancelled.
/// An in-flight pass sees the same token and stops at its next checkpoint.
pub async fn start_purge_worker(
    purger: Arc<Purger>,
    gate: Arc<ClusterGate>,
    schedule: PurgeSchedule,
    shutdown: CancellationToken,
) {
    if schedule.is_idle() {
        tracing::warn!(
            "purge.run_on_startup is false and no purge.cron_expression is set; \
             no purge pass will ever run"
        );
        return;
    }

    let dry_run_msg = if purger.settings().dry_run {
        " (DRY RUN)"
    } else {
        ""
    };

    tracing::info!(
        run_on_startup = schedule.run_on_startup,
        startup_delay_secs = schedule.startup_delay.as_secs(),
        scheduled = schedule.cron.is_some(),
        batch_size = purger.settings().batch_size,
        dry_run = purger.settings().dry_run,
        lease = %gate.name(),
        "Starting purge worker{}",
        dry_run_msg
    );

    if schedule.run_on_startup {
        if !sleep_or_cancel(schedule.startup_delay, &shutdown).await {
            tracing::info!("Purge worker stopped before startup pass");
            return;
        }
        trigger(&purger, &gate, &shutdown).await;
    }

    while schedule.cron.is_some() {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!("Cron schedule has no upcoming runs");
            break;
        };

        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!(next_run = %next, "Waiting for next scheduled purge pass");

        if !sleep_or_cancel(delay, &shutdown).await {
            break;
        }
        trigger(&purger, &gate, &shutdown).await;
    }

    tracing::info!("Purge worker stopped");
}

async fn trigger(purger: &Purger, gate: &ClusterGate, shutdown: &CancellationToken) {
    match run_gated_pass(purger, gate, shutdown).await {
        Ok(_) => {}
        Err(TriggerError::Lock(e)) => {
            tracing::error!(lease = %gate.name(), error = %e, "Lease backend error, skipping purge pass");
        }
        Err(TriggerError::Purge(e)) => {
            tracing::error!(
                stage = e.stage(),
                window = ?e.window(),
                error = %e,
                "Purge pass failed"
            );
        }
    }
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
