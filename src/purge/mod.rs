//! Scheduled purge of old, orphaned content records.
//!
//! - `window`: partitions `[earliest, cutoff)` into scan windows
//! - `runner`: one pass over all windows, batch by batch
//! - `assets`: removes on-disk asset trees of purged records
//! - `worker`: startup and cron triggers, gated by the cluster lease

mod assets;
mod runner;
mod window;
mod worker;

pub use assets::{AssetPathResolver, AssetRemovalReport, AssetRemover, ShardedAssetPaths};
pub use runner::{PassOutcome, PurgeError, PurgeSettings, Purger, RunSummary};
pub use window::{Window, Windows};
pub use worker::{PurgeSchedule, TriggerError, run_gated_pass, start_purge_worker};
