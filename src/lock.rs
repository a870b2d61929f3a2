//! Distributed lease locking for Stockade.
//!
//! Coordinates mutual exclusion across every process sharing one store: lock
//! state lives in the store, not in this process, so two services holding a
//! [`LockCoordinator`] over the same store serialize against each other. Leases
//! expire on their own, which is the only recovery path when a holder crashes
//! without releasing.
//!
//! Ownership is a capability: [`try_acquire`](LockCoordinator::try_acquire)
//! returns a [`LockToken`] and release/reentry require presenting it. No
//! thread or task identity is ever consulted.

use crate::config::LockConfig;
use crate::error::{Result, StockadeError};
use crate::observability;
use crate::store::{LeaseRecord, ResourceStore, ScriptId};
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Capability handle for a held lease. Required for release and reentry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    owner: String,
}

impl LockToken {
    /// The caller-supplied lock key (without the store prefix).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The owner token minted for this acquisition chain.
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

/// Observational lock state for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    /// The caller-supplied lock key.
    pub key: String,
    /// Whether some owner currently holds the lease.
    pub locked: bool,
    /// Remaining lease time, when held.
    pub remaining_lease: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct AcquireReply {
    acquired: bool,
    #[serde(default)]
    hold_count: u32,
}

#[derive(Debug, Deserialize)]
struct ReleaseReply {
    released: bool,
    #[serde(default)]
    remaining: u32,
}

/// Internal counters, mirrored into a [`LockCoordinatorStats`] snapshot.
#[derive(Debug, Default)]
struct LockStats {
    acquired: AtomicU64,
    released: AtomicU64,
    denied: AtomicU64,
    contention: AtomicU64,
}

/// Public lock statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockCoordinatorStats {
    /// Top-level acquisitions granted.
    pub acquired: u64,
    /// Full releases completed.
    pub released: u64,
    /// Acquisition attempts that timed out.
    pub denied: u64,
    /// Attempts that found the lock held by another owner at least once.
    pub contention: u64,
}

/// Acquire/release/exec-with-lock API over the store-resident lease lock.
pub struct LockCoordinator {
    store: Arc<dyn ResourceStore>,
    config: LockConfig,
    stats: LockStats,
}

impl LockCoordinator {
    /// Create a coordinator over a shared store.
    pub fn new(store: Arc<dyn ResourceStore>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            stats: LockStats::default(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn attempt(&self, full_key: &str, owner: &str, lease: Duration) -> Result<AcquireReply> {
        let keys = vec![full_key.to_string()];
        let args = vec![owner.to_string(), lease.as_millis().to_string()];
        let reply = self
            .store
            .run_atomic_script(ScriptId::AcquireLease, &keys, &args)
            .await?;
        serde_json::from_value(reply)
            .map_err(|e| StockadeError::MalformedScriptReply(format!("acquire_lease: {}", e)))
    }

    /// Attempt to claim `key`, waiting up to `wait_timeout` while it is held
    /// by another owner. Returns `None` when the wait elapses without
    /// acquisition. Store errors propagate; the loop never retries past the
    /// configured timeout.
    pub async fn try_acquire(
        &self,
        key: &str,
        wait_timeout: Duration,
        lease_time: Duration,
    ) -> Result<Option<LockToken>> {
        let full_key = self.full_key(key);
        let owner = Uuid::new_v4().to_string();
        let deadline = Instant::now() + wait_timeout;
        let mut contended = false;

        loop {
            let reply = self.attempt(&full_key, &owner, lease_time).await?;
            if reply.acquired {
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                observability::record_lock_acquired();
                debug!(key, owner = %owner, "lock acquired");
                return Ok(Some(LockToken {
                    key: key.to_string(),
                    owner,
                }));
            }

            if !contended {
                contended = true;
                self.stats.contention.fetch_add(1, Ordering::Relaxed);
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.denied.fetch_add(1, Ordering::Relaxed);
                observability::record_lock_denied();
                debug!(key, "lock acquisition timed out");
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::time::sleep(self.config.retry_interval.min(remaining)).await;
        }
    }

    /// Acquire with the configured default wait and lease.
    pub async fn try_acquire_default(&self, key: &str) -> Result<Option<LockToken>> {
        self.try_acquire(
            key,
            self.config.default_wait_timeout,
            self.config.default_lease_time,
        )
        .await
    }

    /// Reenter a lease already held through `token`. Never blocks: the holder
    /// either still owns the record (hold count goes up, lease expiry stays
    /// put) or the lease lapsed and the claim is gone, in which case this
    /// returns false.
    pub async fn reacquire(&self, token: &LockToken) -> Result<bool> {
        let full_key = self.full_key(&token.key);
        // Lease argument is irrelevant for reentry; the script keeps the outer
        // expiry. Pass the default to satisfy the script shape.
        let reply = self
            .attempt(&full_key, &token.owner, self.config.default_lease_time)
            .await?;
        if reply.acquired && reply.hold_count > 1 {
            return Ok(true);
        }
        // A fresh claim under a token the caller thinks is nested means the
        // original lease expired in between. Roll it back and report failure.
        if reply.acquired {
            self.store
                .compare_and_delete_if_owner(&full_key, &token.owner)
                .await?;
        }
        Ok(false)
    }

    /// Drop one hold on the lease. Idempotent: releasing a token whose lease
    /// already expired, or that was never granted, is a no-op. When the hold
    /// count reaches zero the claim is removed from the store.
    pub async fn release(&self, token: &LockToken) -> Result<()> {
        let full_key = self.full_key(&token.key);
        let keys = vec![full_key.clone()];
        let args = vec![token.owner.clone()];
        let reply = self
            .store
            .run_atomic_script(ScriptId::ReleaseLease, &keys, &args)
            .await?;
        let reply: ReleaseReply = serde_json::from_value(reply)
            .map_err(|e| StockadeError::MalformedScriptReply(format!("release_lease: {}", e)))?;

        if !reply.released {
            debug!(key = %token.key, "release on lock not held; ignoring");
            return Ok(());
        }

        if reply.remaining == 0 {
            // The owner token dies with this acquisition chain, so the delete
            // can only ever remove our own record.
            self.store
                .compare_and_delete_if_owner(&full_key, &token.owner)
                .await?;
            self.stats.released.fetch_add(1, Ordering::Relaxed);
            observability::record_lock_released();
        }
        Ok(())
    }

    /// Acquire `key`, run `action`, and release on every exit path, including
    /// cancellation and panics. Returns `None` without invoking `action` when
    /// the lock cannot be acquired within `wait_timeout`.
    pub async fn with_lock<F, Fut, T>(
        self: Arc<Self>,
        key: &str,
        wait_timeout: Duration,
        lease_time: Duration,
        action: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(token) = self.try_acquire(key, wait_timeout, lease_time).await? else {
            return Ok(None);
        };

        let mut guard = LockGuard::new(self, token);
        let result = action().await;
        guard.release().await?;
        result.map(Some)
    }

    /// Like [`with_lock`](Self::with_lock) but acquisition failure is an
    /// error, for callers that need fail-fast semantics.
    pub async fn with_lock_or_fail<F, Fut, T>(
        self: Arc<Self>,
        key: &str,
        wait_timeout: Duration,
        lease_time: Duration,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.with_lock(key, wait_timeout, lease_time, action).await? {
            Some(value) => Ok(value),
            None => Err(StockadeError::LockAcquisitionTimeout(key.to_string())),
        }
    }

    /// Whether some owner currently holds `key`. Observational only; the
    /// answer can be stale by the time the caller acts on it.
    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        let value = self.store.get(&self.full_key(key)).await?;
        match value {
            Some(raw) => {
                let record: LeaseRecord = serde_json::from_str(&raw)
                    .map_err(|e| StockadeError::MalformedScriptReply(format!("lease record: {}", e)))?;
                Ok(record.hold_count > 0)
            }
            None => Ok(false),
        }
    }

    /// Whether `token` still owns its lease. Observational only.
    pub async fn is_held_by(&self, token: &LockToken) -> Result<bool> {
        let value = self.store.get(&self.full_key(&token.key)).await?;
        match value {
            Some(raw) => {
                let record: LeaseRecord = serde_json::from_str(&raw)
                    .map_err(|e| StockadeError::MalformedScriptReply(format!("lease record: {}", e)))?;
                Ok(record.hold_count > 0 && record.owner == token.owner)
            }
            None => Ok(false),
        }
    }

    /// Observational lock status for a key, including the remaining lease.
    pub async fn status(&self, key: &str) -> Result<LockStatus> {
        let read = self.store.get_with_ttl(&self.full_key(key)).await?;
        let locked = match &read.value {
            Some(raw) => {
                let record: LeaseRecord = serde_json::from_str(raw)
                    .map_err(|e| StockadeError::MalformedScriptReply(format!("lease record: {}", e)))?;
                record.hold_count > 0
            }
            None => false,
        };
        Ok(LockStatus {
            key: key.to_string(),
            locked,
            remaining_lease: if locked { read.ttl } else { None },
        })
    }

    /// Get lock statistics.
    pub fn stats(&self) -> LockCoordinatorStats {
        LockCoordinatorStats {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            denied: self.stats.denied.load(Ordering::Relaxed),
            contention: self.stats.contention.load(Ordering::Relaxed),
        }
    }
}

/// RAII guard for a held lease.
///
/// Normal flow calls [`release`](Self::release); if the guard is dropped
/// without it (panic, task cancellation), the release is spawned in the
/// background so the claim never outlives the critical section by more than
/// the lease.
pub struct LockGuard {
    coordinator: Arc<LockCoordinator>,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    /// Wrap an acquired token.
    pub fn new(coordinator: Arc<LockCoordinator>, token: LockToken) -> Self {
        Self {
            coordinator,
            token,
            released: false,
        }
    }

    /// The held token.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release explicitly.
    pub async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.coordinator.release(&self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            let coordinator = Arc::clone(&self.coordinator);
            let token = self.token.clone();
            warn!(key = %token.key, "lock guard dropped without release; releasing in background");
            tokio::spawn(async move {
                let _ = coordinator.release(&token).await;
            });
        }
    }
}
