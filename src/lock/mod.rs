//! Cluster lease used to run at most one purge pass at a time.
//!
//! Backends:
//! - `memory`: in-process only, for single-node deployments and tests
//! - `redis`: shared across nodes (`SET NX PX` plus token-checked scripts)

mod error;
mod gate;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod traits;

use std::sync::Arc;

pub use error::{LockError, LockResult};
pub use gate::ClusterGate;
pub use memory::MemoryLeaseStore;
#[cfg(feature = "redis")]
pub use redis::RedisLeaseStore;
pub use traits::{LeaseHandle, LeaseStore, new_lease_token};

use crate::config::{LockBackendConfig, LockConfig};

/// Build the lease store selected by configuration.
pub async fn create_lease_store(config: &LockConfig) -> LockResult<Arc<dyn LeaseStore>> {
    match &config.backend {
        LockBackendConfig::Memory => {
            tracing::warn!(
                "Using in-memory lease store; passes are only exclusive within this process"
            );
            Ok(Arc::new(MemoryLeaseStore::new()))
        }
        #[cfg(feature = "redis")]
        LockBackendConfig::Redis(redis_config) => {
            let store = RedisLeaseStore::from_config(redis_config).await?;
            tracing::info!(
                cluster = redis_config.cluster.is_some(),
                "Using Redis lease store"
            );
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        LockBackendConfig::Redis(_) => Err(LockError::NotConfigured(
            "lock backend 'redis' requires the 'redis' feature".into(),
        )),
    }
}
