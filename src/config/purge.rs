//! Content purge configuration.
//!
//! Controls when the purge job runs and how aggressively it deletes
//! orphaned content versions.
//!
//! # Example
//!
//! ```toml
//! [purge]
//! run_on_startup = true
//! startup_delay_secs = 10
//! cron_expression = "0 15 6 * * *"
//! dry_run = false
//! older_than_days = 30
//! batch_size = 100
//! iterate_by_days = 30
//! assets_root = "/data/shared/assets"
//! ```

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Content purge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeConfig {
    /// Run one pass shortly after the process starts.
    /// Default: true
    #[serde(default = "default_true")]
    pub run_on_startup: bool,

    /// Delay before the startup pass, in seconds.
    /// Default: 10
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Cron expression for recurring passes, seconds first
    /// (e.g. `0 15 6 * * *` for 06:15:00 every day, host local time).
    /// Quartz-style `?` placeholders are accepted.
    /// Default: none (no recurring passes)
    #[serde(default)]
    pub cron_expression: Option<String>,

    /// Count candidates without deleting anything.
    /// Default: true (deletion must be explicitly enabled)
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Only records last modified more than this many days ago are eligible.
    /// Default: 30
    #[serde(default = "default_older_than_days")]
    pub older_than_days: u32,

    /// Maximum number of records loaded and deleted per batch.
    /// Each batch is one transaction.
    /// Default: 100
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Width of each scan window in days.
    /// Default: 30
    #[serde(default = "default_iterate_by_days")]
    pub iterate_by_days: u32,

    /// Root of the on-disk asset tree.
    /// Default: "assets"
    #[serde(default = "default_assets_root")]
    pub assets_root: String,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            run_on_startup: true,
            startup_delay_secs: default_startup_delay_secs(),
            cron_expression: None,
            dry_run: true,
            older_than_days: default_older_than_days(),
            batch_size: default_batch_size(),
            iterate_by_days: default_iterate_by_days(),
            assets_root: default_assets_root(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_startup_delay_secs() -> u64 {
    10
}

fn default_older_than_days() -> u32 {
    30
}

fn default_batch_size() -> u32 {
    100
}

fn default_iterate_by_days() -> u32 {
    30
}

fn default_assets_root() -> String {
    "assets".to_string()
}

impl PurgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation(
                "purge.batch_size must be greater than 0".into(),
            ));
        }
        if self.iterate_by_days == 0 {
            return Err(ConfigError::Validation(
                "purge.iterate_by_days must be greater than 0".into(),
            ));
        }
        if self.assets_root.is_empty() {
            return Err(ConfigError::Validation(
                "purge.assets_root cannot be empty".into(),
            ));
        }
        self.schedule()?;
        Ok(())
    }

    /// Width of one scan window.
    pub fn window_step(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.iterate_by_days))
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    /// Parse the cron expression, if any.
    pub fn schedule(&self) -> Result<Option<cron::Schedule>, ConfigError> {
        self.cron_expression
            .as_deref()
            .map(parse_cron)
            .transpose()
    }
}

/// Parse a seconds-first cron expression, accepting Quartz `?` as "any".
fn parse_cron(expression: &str) -> Result<cron::Schedule, ConfigError> {
    let normalized = expression.trim().replace('?', "*");
    cron::Schedule::from_str(&normalized).map_err(|e| {
        ConfigError::Validation(format!(
            "purge.cron_expression '{expression}' is invalid: {e}"
        ))
    })
}
