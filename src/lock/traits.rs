use std::time::Duration;

use async_trait::async_trait;

use super::error::LockResult;

/// Proof of holding a named lease.
///
/// The token is unique per acquisition, so a holder whose lease expired and
/// was taken over can never renew or release the new holder's lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseHandle {
    name: String,
    token: String,
}

impl LeaseHandle {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Generate a lease token identifying this host and acquisition.
pub fn new_lease_token() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    format!("{}:{}", host, uuid::Uuid::new_v4())
}

/// Storage for TTL-bound, token-guarded named leases.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if nobody holds it (or the holder's lease expired).
    /// Returns `None` without waiting when another holder is active.
    async fn acquire(&self, name: &str, ttl: Duration) -> LockResult<Option<LeaseHandle>>;

    /// Extend a held lease. Returns `false` when the lease is no longer ours.
    async fn renew(&self, lease: &LeaseHandle, ttl: Duration) -> LockResult<bool>;

    /// Give the lease up. Returns `false` when it was no longer ours.
    async fn release(&self, lease: &LeaseHandle) -> LockResult<bool>;

    fn backend_name(&self) -> &'static str;
}
