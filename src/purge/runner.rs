//! The purge pass: windowed scan, batched delete, asset cleanup.
//!
//! A pass moves through `indexing -> scanning(window) -> draining(batch) ->
//! advancing` and ends either completed or interrupted. Each batch is one
//! store transaction; the pass as a whole is not atomic, and a later pass
//! picks up from whatever the store still holds.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    assets::{AssetRemovalReport, AssetRemover},
    window::{Window, Windows},
};
use crate::{
    config::PurgeConfig,
    db::{ContentletRepo, DbError, DbResult},
    observability::metrics,
};

/// 2010-01-01T00:00:00Z, used as the first window start when the store
/// holds no eligible rows.
const EARLIEST_FALLBACK_SECS: i64 = 1_262_304_000;

fn earliest_fallback() -> DateTime<Utc> {
    DateTime::from_timestamp(EARLIEST_FALLBACK_SECS, 0).unwrap_or_default()
}

/// Tuning for a purge pass, derived from `[purge]`.
#[derive(Debug, Clone)]
pub struct PurgeSettings {
    pub dry_run: bool,
    /// Records modified more than this long ago are eligible.
    pub older_than: chrono::Duration,
    pub batch_size: u32,
    pub window_step: chrono::Duration,
}

impl PurgeSettings {
    /// Records modified before this instant are eligible at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.older_than
    }
}

impl From<&PurgeConfig> for PurgeSettings {
    fn from(config: &PurgeConfig) -> Self {
        Self {
            dry_run: config.dry_run,
            older_than: chrono::Duration::days(i64::from(config.older_than_days)),
            batch_size: config.batch_size,
            window_step: config.window_step(),
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassOutcome {
    #[default]
    Completed,
    /// Cancelled at a checkpoint; remaining windows were not visited.
    Interrupted,
}

impl PassOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Completed => "completed",
            PassOutcome::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals for one pass. Logged, never persisted.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dry_run: bool,
    pub cutoff: DateTime<Utc>,
    /// Start of the first window, once known.
    pub earliest: Option<DateTime<Utc>>,
    /// Candidates loaded across all batches.
    pub found: u64,
    /// Records deleted; on dry runs, the records that would have been.
    pub deleted: u64,
    pub batches: u64,
    pub windows_completed: u64,
    pub assets: AssetRemovalReport,
    pub duration: Duration,
    pub outcome: PassOutcome,
}

impl RunSummary {
    fn new(dry_run: bool, cutoff: DateTime<Utc>) -> Self {
        Self {
            dry_run,
            cutoff,
            earliest: None,
            found: 0,
            deleted: 0,
            batches: 0,
            windows_completed: 0,
            assets: AssetRemovalReport::default(),
            duration: Duration::ZERO,
            outcome: PassOutcome::Completed,
        }
    }

    pub fn asset_failures(&self) -> u64 {
        self.assets.failed
    }

    pub fn is_interrupted(&self) -> bool {
        self.outcome == PassOutcome::Interrupted
    }
}

/// A failed pass. Window-scoped variants carry the bounds being processed.
#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("Failed to ensure mod_date index: {0}")]
    Index(#[source] DbError),

    #[error("Failed to read earliest mod_date: {0}")]
    Earliest(#[source] DbError),

    #[error("Failed to load candidates in window {window}: {source}")]
    Scan {
        window: Window,
        #[source]
        source: DbError,
    },

    #[error("Failed to purge batch of {batch_size} in window {window}: {source}")]
    Purge {
        window: Window,
        batch_size: usize,
        #[source]
        source: DbError,
    },
}

impl PurgeError {
    /// Short name of the failed operation, used as a metric label.
    pub fn stage(&self) -> &'static str {
        match self {
            PurgeError::Index(_) => "index",
            PurgeError::Earliest(_) => "earliest",
            PurgeError::Scan { .. } => "scan",
            PurgeError::Purge { .. } => "purge",
        }
    }

    pub fn window(&self) -> Option<&Window> {
        match self {
            PurgeError::Scan { window, .. } | PurgeError::Purge { window, .. } => Some(window),
            PurgeError::Index(_) | PurgeError::Earliest(_) => None,
        }
    }
}

/// Runs purge passes against one content store.
///
/// Holds no per-pass state: the cutoff and the first window are derived
/// fresh at the start of every pass.
pub struct Purger {
    repo: Arc<dyn ContentletRepo>,
    assets: AssetRemover,
    settings: PurgeSettings,
}

impl Purger {
    pub fn new(repo: Arc<dyn ContentletRepo>, assets: AssetRemover, settings: PurgeSettings) -> Self {
        Self {
            repo,
            assets,
            settings,
        }
    }

    /// Purger with the sharded asset layout under `config.assets_root`.
    pub fn from_config(repo: Arc<dyn ContentletRepo>, config: &PurgeConfig) -> Self {
        Self::new(
            repo,
            AssetRemover::sharded(&config.assets_root),
            PurgeSettings::from(config),
        )
    }

    pub fn settings(&self) -> &PurgeSettings {
        &self.settings
    }

    /// Override the configured dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.settings.dry_run = dry_run;
        self
    }

    /// Run one pass with the cutoff taken from the current time.
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<RunSummary, PurgeError> {
        self.run_pass_at(Utc::now(), cancel).await
    }

    /// Run one pass as if the current time were `now`.
    pub async fn run_pass_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, PurgeError> {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.settings.dry_run, self.settings.cutoff(now));

        match self.run_windows(cancel, &mut summary).await {
            Ok(outcome) => {
                summary.outcome = outcome;
                summary.duration = started.elapsed();
                metrics::record_pass_duration(outcome.as_str(), summary.duration.as_secs_f64());
                log_summary(&summary);
                Ok(summary)
            }
            Err(e) => {
                metrics::record_pass_error(e.stage());
                Err(e)
            }
        }
    }

    /// Delete one batch, or count it on dry runs.
    ///
    /// Returns the number of records deleted (dry run: `inodes.len()`).
    pub async fn execute_batch(&self, inodes: &[String]) -> DbResult<u64> {
        if inodes.is_empty() {
            return Ok(0);
        }
        if self.settings.dry_run {
            return Ok(inodes.len() as u64);
        }
        self.repo.purge(inodes).await
    }

    async fn run_windows(
        &self,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<PassOutcome, PurgeError> {
        debug!(state = "indexing", "Ensuring mod_date index");
        self.repo
            .ensure_mod_date_index()
            .await
            .map_err(PurgeError::Index)?;

        let earliest = self
            .repo
            .earliest_mod_date()
            .await
            .map_err(PurgeError::Earliest)?
            .unwrap_or_else(earliest_fallback);
        summary.earliest = Some(earliest);

        info!(
            dry_run = self.settings.dry_run,
            cutoff = %summary.cutoff,
            earliest = %earliest,
            batch_size = self.settings.batch_size,
            "Starting purge pass"
        );

        for window in Windows::new(earliest, summary.cutoff, self.settings.window_step) {
            if cancel.is_cancelled() {
                return Ok(PassOutcome::Interrupted);
            }

            debug!(
                state = "scanning",
                window_start = %window.start,
                window_end = %window.end,
                "Scanning window"
            );

            if self.drain_window(&window, cancel, summary).await? == PassOutcome::Interrupted {
                return Ok(PassOutcome::Interrupted);
            }

            summary.windows_completed += 1;
            debug!(
                state = "advancing",
                window_end = %window.end,
                deleted = summary.deleted,
                "Window drained"
            );
        }

        Ok(PassOutcome::Completed)
    }

    /// Load, purge and clean up batches until the window yields nothing.
    ///
    /// The keyset cursor moves past every loaded batch, so dry runs (which
    /// delete nothing) still visit each candidate exactly once.
    async fn drain_window(
        &self,
        window: &Window,
        cancel: &CancellationToken,
        summary: &mut RunSummary,
    ) -> Result<PassOutcome, PurgeError> {
        let mode = if self.settings.dry_run { "dry_run" } else { "live" };
        let mut cursor: Option<String> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(PassOutcome::Interrupted);
            }

            let batch = self
                .repo
                .find_orphaned(window, self.settings.batch_size, cursor.as_deref())
                .await
                .map_err(|source| PurgeError::Scan {
                    window: *window,
                    source,
                })?;

            if batch.is_empty() {
                return Ok(PassOutcome::Completed);
            }
            summary.found += batch.len() as u64;

            if cancel.is_cancelled() {
                return Ok(PassOutcome::Interrupted);
            }

            debug!(
                state = "draining",
                window_start = %window.start,
                window_end = %window.end,
                batch_size = batch.len(),
                dry_run = self.settings.dry_run,
                "Purging batch"
            );

            let deleted = self
                .execute_batch(&batch)
                .await
                .map_err(|source| PurgeError::Purge {
                    window: *window,
                    batch_size: batch.len(),
                    source,
                })?;
            summary.deleted += deleted;
            summary.batches += 1;
            metrics::record_records_deleted(mode, deleted);

            // A committed batch always has its assets removed, even when the
            // pass was cancelled while the transaction ran.
            let stop_after_assets = cancel.is_cancelled();
            if !self.settings.dry_run {
                let report = self.assets.remove_assets(&batch).await;
                if !report.all_succeeded() {
                    warn!(
                        window_start = %window.start,
                        window_end = %window.end,
                        failed = report.failed,
                        "Some asset directories could not be removed"
                    );
                }
                metrics::record_asset_failures(report.failed);
                summary.assets.merge(&report);
            }

            if stop_after_assets {
                debug!(
                    window_start = %window.start,
                    window_end = %window.end,
                    "Cancelled during batch; stopping after its asset cleanup"
                );
                return Ok(PassOutcome::Interrupted);
            }

            cursor = batch.last().cloned();
        }
    }
}

fn log_summary(summary: &RunSummary) {
    let dry_run_msg = if summary.dry_run { " (DRY RUN)" } else { "" };

    info!(
        outcome = %summary.outcome,
        dry_run = summary.dry_run,
        cutoff = %summary.cutoff,
        found = summary.found,
        deleted = summary.deleted,
        batches = summary.batches,
        windows = summary.windows_completed,
        assets_removed = summary.assets.removed,
        asset_failures = summary.assets.failed,
        duration_ms = summary.duration.as_millis() as u64,
        "Purge pass finished{}",
        dry_run_msg
    );
}
