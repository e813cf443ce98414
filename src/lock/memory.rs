use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};

use super::{
    error::LockResult,
    traits::{LeaseHandle, LeaseStore, new_lease_token},
};

struct LeaseEntry {
    token: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn new(token: String, ttl: Duration) -> Self {
        Self {
            token,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process lease store using DashMap for concurrent access.
///
/// # Multi-Node Deployments
///
/// **WARNING**: Leases are NOT shared between processes. Two nodes using
/// this backend will both run passes. Use the Redis backend when more than
/// one node points at the same content store.
#[derive(Clone, Default)]
pub struct MemoryLeaseStore {
    leases: Arc<DashMap<String, LeaseEntry>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn acquire(&self, name: &str, ttl: Duration) -> LockResult<Option<LeaseHandle>> {
        let token = new_lease_token();

        // Entry API holds the shard lock across check-and-insert.
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut e) => {
                if e.get().is_expired() {
                    e.insert(LeaseEntry::new(token.clone(), ttl));
                    Ok(Some(LeaseHandle::new(name, token)))
                } else {
                    Ok(None)
                }
            }
            Entry::Vacant(e) => {
                e.insert(LeaseEntry::new(token.clone(), ttl));
                Ok(Some(LeaseHandle::new(name, token)))
            }
        }
    }

    async fn renew(&self, lease: &LeaseHandle, ttl: Duration) -> LockResult<bool> {
        match self.leases.get_mut(lease.name()) {
            Some(mut entry) if entry.token == lease.token() && !entry.is_expired() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &LeaseHandle) -> LockResult<bool> {
        Ok(self
            .leases
            .remove_if(lease.name(), |_, entry| entry.token == lease.token())
            .is_some())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_acquire_free_lease() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("purge", TTL).await.unwrap();
        assert!(lease.is_some());
        assert_eq!(lease.unwrap().name(), "purge");
    }

    #[tokio::test]
    async fn test_acquire_held_lease_returns_none() {
        let store = MemoryLeaseStore::new();
        let _held = store.acquire("purge", TTL).await.unwrap().unwrap();
        assert!(store.acquire("purge", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_conflict() {
        let store = MemoryLeaseStore::new();
        assert!(store.acquire("purge-a", TTL).await.unwrap().is_some());
        assert!(store.acquire("purge-b", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("purge", TTL).await.unwrap().unwrap();
        assert!(store.release(&lease).await.unwrap());
        assert!(store.acquire("purge", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = MemoryLeaseStore::new();
        let stale = store
            .acquire("purge", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let fresh = store.acquire("purge", TTL).await.unwrap();
        assert!(fresh.is_some(), "expired lease should be reclaimable");

        // The crashed holder can neither renew nor release the new lease
        assert!(!store.renew(&stale, TTL).await.unwrap());
        assert!(!store.release(&stale).await.unwrap());
        assert!(store.acquire("purge", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let store = MemoryLeaseStore::new();
        let lease = store
            .acquire("purge", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();

        assert!(store.renew(&lease, TTL).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.acquire("purge", TTL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renew_after_release_fails() {
        let store = MemoryLeaseStore::new();
        let lease = store.acquire("purge", TTL).await.unwrap().unwrap();
        store.release(&lease).await.unwrap();
        assert!(!store.renew(&lease, TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let store = MemoryLeaseStore::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.acquire("purge", TTL).await.unwrap().is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
