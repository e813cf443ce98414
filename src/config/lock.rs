use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cluster lease configuration.
///
/// A pass only runs on the node that holds the named lease. The lease
/// expires on its own after `ttl_secs` if the holder dies without
/// releasing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// Lease name. Nodes sharing a name exclude each other.
    #[serde(default = "default_lock_name")]
    pub name: String,

    /// Lease time-to-live in seconds. Renewed while a pass runs.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Where the lease is stored.
    #[serde(default)]
    pub backend: LockBackendConfig,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            name: default_lock_name(),
            ttl_secs: default_ttl_secs(),
            backend: LockBackendConfig::default(),
        }
    }
}

fn default_lock_name() -> String {
    "content-purge".to_string()
}

fn default_ttl_secs() -> u64 {
    60
}

impl LockConfig {
    pub fn ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation("lock.name cannot be empty".into()));
        }
        // Renewal runs every ttl/3; anything shorter would spin.
        if self.ttl_secs < 3 {
            return Err(ConfigError::Validation(
                "lock.ttl_secs must be at least 3".into(),
            ));
        }
        self.backend.validate()
    }
}

/// Lease storage backend.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum LockBackendConfig {
    /// In-process lease. Only excludes passes within one process.
    /// Suitable for single-node deployments and tests.
    #[default]
    Memory,

    /// Redis lease. Required for multi-node deployments.
    Redis(RedisLockConfig),
}

impl LockBackendConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LockBackendConfig::Memory => Ok(()),
            LockBackendConfig::Redis(c) => c.validate(),
        }
    }
}

/// Redis lease configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisLockConfig {
    /// Redis connection URL.
    /// Format: redis://[user:password@]host:port[/database]
    /// For clusters: comma-separated node list with `[lock.backend.cluster]` set.
    pub url: String,

    /// Key prefix for lease keys.
    /// Useful when sharing a Redis instance with other applications.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Cluster mode configuration.
    #[serde(default)]
    pub cluster: Option<RedisClusterConfig>,
}

impl RedisLockConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Validation("Redis URL cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_key_prefix() -> String {
    "lock:".to_string()
}

/// Redis cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisClusterConfig {
    /// Number of retries for cluster operations.
    #[serde(default = "default_cluster_retries")]
    pub retries: u32,

    /// Connection timeout for cluster nodes in seconds.
    #[serde(default = "default_cluster_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Response timeout for cluster operations in seconds.
    #[serde(default = "default_cluster_response_timeout")]
    pub response_timeout_secs: u64,
}

fn default_cluster_retries() -> u32 {
    3
}

fn default_cluster_connection_timeout() -> u64 {
    5
}

fn default_cluster_response_timeout() -> u64 {
    1
}
