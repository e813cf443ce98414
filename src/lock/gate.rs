//! Cluster-wide mutual exclusion around a purge pass.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::{LockError, LockResult},
    traits::{LeaseHandle, LeaseStore},
};
use crate::config::LockConfig;

/// Runs a closure only on the node holding the named lease.
///
/// While the closure runs, a heartbeat renews the lease every `ttl / 3`.
/// If the lease is lost (taken over after expiry, or unrenewable for a full
/// TTL) the token handed to the closure is cancelled so it can stop at its
/// next checkpoint.
pub struct ClusterGate {
    store: Arc<dyn LeaseStore>,
    name: String,
    ttl: Duration,
}

impl ClusterGate {
    pub fn new(store: Arc<dyn LeaseStore>, name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            name: name.into(),
            ttl,
        }
    }

    pub fn from_config(store: Arc<dyn LeaseStore>, config: &LockConfig) -> Self {
        Self::new(store, config.name.clone(), config.ttl())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the lease and run `pass`, or return `Ok(None)` immediately if
    /// another holder is active.
    ///
    /// `pass` receives a child of `cancel` that is also cancelled when the
    /// lease is lost. The lease is released after `pass` finishes, whatever
    /// it returned.
    pub async fn try_run_exclusively<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        pass: F,
    ) -> LockResult<Option<T>>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(lease) = self.store.acquire(&self.name, self.ttl).await? else {
            debug!(lease = %self.name, "Lease held by another node, skipping");
            return Ok(None);
        };

        info!(
            lease = %self.name,
            backend = self.store.backend_name(),
            token = %lease.token(),
            "Acquired lease"
        );

        let pass_token = cancel.child_token();
        let stop_heartbeat = CancellationToken::new();
        // Stops the heartbeat even if this future is dropped mid-pass.
        let _heartbeat_guard = stop_heartbeat.clone().drop_guard();

        tokio::spawn(heartbeat(
            Arc::clone(&self.store),
            lease.clone(),
            self.ttl,
            pass_token.clone(),
            stop_heartbeat.clone(),
        ));

        let output = pass(pass_token).await;

        stop_heartbeat.cancel();

        match self.store.release(&lease).await {
            Ok(true) => debug!(lease = %self.name, "Released lease"),
            Ok(false) => warn!(
                lease = %self.name,
                "Lease was no longer held at release time"
            ),
            Err(e) => warn!(
                lease = %self.name,
                error = %e,
                "Failed to release lease; it will expire on its own"
            ),
        }

        Ok(Some(output))
    }
}

async fn heartbeat(
    store: Arc<dyn LeaseStore>,
    lease: LeaseHandle,
    ttl: Duration,
    pass_token: CancellationToken,
    stop: CancellationToken,
) {
    let interval = (ttl / 3).max(Duration::from_millis(1));
    let mut last_renewed = Instant::now();

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        // A renewal that hangs past the lease's remaining lifetime counts as a failure.
        let remaining = ttl.saturating_sub(last_renewed.elapsed());
        let renewed = tokio::time::timeout(remaining, store.renew(&lease, ttl))
            .await
            .unwrap_or_else(|_| {
                Err(LockError::Internal(format!(
                    "lease renewal did not complete within {remaining:?}"
                )))
            });

        match renewed {
            Ok(true) => {
                last_renewed = Instant::now();
            }
            Ok(false) => {
                warn!(lease = %lease.name(), "Lease lost, cancelling pass");
                pass_token.cancel();
                return;
            }
            Err(e) if last_renewed.elapsed() >= ttl => {
                error!(
                    lease = %lease.name(),
                    error = %e,
                    "Lease could not be renewed within its TTL, cancelling pass"
                );
                pass_token.cancel();
                return;
            }
            Err(e) => {
                warn!(lease = %lease.name(), error = %e, "Failed to renew lease, will retry");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Notify, oneshot};

    use super::*;
    use crate::lock::{LockError, MemoryLeaseStore};

    const TTL: Duration = Duration::from_secs(60);

    fn gate(store: &MemoryLeaseStore) -> ClusterGate {
        ClusterGate::new(Arc::new(store.clone()), "content-purge", TTL)
    }

    #[tokio::test]
    async fn test_runs_pass_and_releases() {
        let store = MemoryLeaseStore::new();
        let cancel = CancellationToken::new();

        let output = gate(&store)
            .try_run_exclusively(&cancel, |_| async { 42 })
            .await
            .unwrap();

        assert_eq!(output, Some(42));
        assert!(store.acquire("content-purge", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_skips_when_held_elsewhere() {
        let store = MemoryLeaseStore::new();
        let _held = store.acquire("content-purge", TTL).await.unwrap().unwrap();
        let ran = AtomicUsize::new(0);

        let output = gate(&store)
            .try_run_exclusively(&CancellationToken::new(), |_| async {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        assert!(output.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_releases_after_failed_pass() {
        let store = MemoryLeaseStore::new();

        let output = gate(&store)
            .try_run_exclusively(&CancellationToken::new(), |_| async {
                Err::<(), &str>("boom")
            })
            .await
            .unwrap();

        assert_eq!(output, Some(Err("boom")));
        assert!(store.acquire("content-purge", TTL).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_mutual_exclusion_between_nodes() {
        let store = MemoryLeaseStore::new();
        let node_a = gate(&store);
        let node_b = gate(&store);
        let cancel = CancellationToken::new();

        let (started_tx, started_rx) = oneshot::channel();
        let finish = Arc::new(Notify::new());
        let finish_a = Arc::clone(&finish);

        let cancel_a = cancel.clone();
        let a = tokio::spawn(async move {
            node_a
                .try_run_exclusively(&cancel_a, |_| async move {
                    let _ = started_tx.send(());
                    finish_a.notified().await;
                    "a"
                })
                .await
                .unwrap()
        });

        started_rx.await.unwrap();
        let b = node_b
            .try_run_exclusively(&cancel, |_| async { "b" })
            .await
            .unwrap();
        assert!(b.is_none(), "second node must not run while the first holds the lease");

        finish.notify_one();
        assert_eq!(a.await.unwrap(), Some("a"));

        let b = node_b
            .try_run_exclusively(&cancel, |_| async { "b" })
            .await
            .unwrap();
        assert_eq!(b, Some("b"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_pass() {
        let store = MemoryLeaseStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let saw_cancel = gate(&store)
            .try_run_exclusively(&cancel, |token| async move { token.is_cancelled() })
            .await
            .unwrap();

        assert_eq!(saw_cancel, Some(true));
    }

    /// Grants the lease but refuses every renewal.
    struct LosingStore;

    #[async_trait]
    impl LeaseStore for LosingStore {
        async fn acquire(&self, name: &str, _ttl: Duration) -> LockResult<Option<LeaseHandle>> {
            Ok(Some(LeaseHandle::new(name, "token")))
        }

        async fn renew(&self, _lease: &LeaseHandle, _ttl: Duration) -> LockResult<bool> {
            Ok(false)
        }

        async fn release(&self, _lease: &LeaseHandle) -> LockResult<bool> {
            Ok(false)
        }

        fn backend_name(&self) -> &'static str {
            "losing"
        }
    }

    #[tokio::test]
    async fn test_lost_lease_cancels_pass() {
        let gate = ClusterGate::new(Arc::new(LosingStore), "content-purge", Duration::from_millis(30));
        let parent = CancellationToken::new();

        let output = gate
            .try_run_exclusively(&parent, |token| async move {
                tokio::time::timeout(Duration::from_secs(5), token.cancelled())
                    .await
                    .is_ok()
            })
            .await
            .unwrap();

        assert_eq!(output, Some(true), "pass should observe cancellation");
        assert!(!parent.is_cancelled(), "only the pass token is cancelled");
    }

    /// Grants the lease, then every renewal hangs forever.
    struct HangingStore;

    #[async_trait]
    impl LeaseStore for HangingStore {
        async fn acquire(&self, name: &str, _ttl: Duration) -> LockResult<Option<LeaseHandle>> {
            Ok(Some(LeaseHandle::new(name, "token")))
        }

        async fn renew(&self, _lease: &LeaseHandle, _ttl: Duration) -> LockResult<bool> {
            std::future::pending().await
        }

        async fn release(&self, _lease: &LeaseHandle) -> LockResult<bool> {
            Ok(true)
        }

        fn backend_name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_hung_renewal_cancels_pass_within_ttl() {
        let gate = ClusterGate::new(Arc::new(HangingStore), "content-purge", Duration::from_millis(30));

        let output = gate
            .try_run_exclusively(&CancellationToken::new(), |token| async move {
                tokio::time::timeout(Duration::from_secs(1), token.cancelled())
                    .await
                    .is_ok()
            })
            .await
            .unwrap();

        assert_eq!(output, Some(true), "a renewal that never returns must cancel the pass");
    }

    /// Backend that is unreachable.
    struct BrokenStore;

    #[async_trait]
    impl LeaseStore for BrokenStore {
        async fn acquire(&self, _name: &str, _ttl: Duration) -> LockResult<Option<LeaseHandle>> {
            Err(LockError::Internal("connection refused".into()))
        }

        async fn renew(&self, _lease: &LeaseHandle, _ttl: Duration) -> LockResult<bool> {
            Err(LockError::Internal("connection refused".into()))
        }

        async fn release(&self, _lease: &LeaseHandle) -> LockResult<bool> {
            Err(LockError::Internal("connection refused".into()))
        }

        fn backend_name(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_backend_error_surfaces() {
        let gate = ClusterGate::new(Arc::new(BrokenStore), "content-purge", TTL);
        let result = gate
            .try_run_exclusively(&CancellationToken::new(), |_| async {})
            .await;
        assert!(matches!(result, Err(LockError::Internal(_))));
    }
}
