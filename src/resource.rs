//! Contended resource operations.
//!
//! [`ResourceManager`] owns the read/write path for inventory records and the
//! three competing decrement strategies. The store holds the only
//! authoritative copy; everything here works on snapshots.

use crate::config::{HarnessConfig, LockConfig, StoreConfig};
use crate::error::{Result, StockadeError};
use crate::lock::LockCoordinator;
use crate::mutator::AtomicMutator;
use crate::observability;
use crate::store::ResourceStore;
use crate::types::{ContendedResource, DecrementRejection, DecrementResult, DecrementStrategy};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// CRUD and decrement strategies for inventory records.
pub struct ResourceManager {
    store: Arc<dyn ResourceStore>,
    locks: Arc<LockCoordinator>,
    mutator: AtomicMutator,
    store_config: StoreConfig,
    lock_config: LockConfig,
    /// Injected delay inside the uncoordinated read-modify-write.
    contention_window: Duration,
    /// Injected delay inside the locked critical section.
    locked_window: Duration,
}

impl ResourceManager {
    /// Create a manager over a shared store and coordinator.
    pub fn new(
        store: Arc<dyn ResourceStore>,
        locks: Arc<LockCoordinator>,
        store_config: StoreConfig,
        lock_config: LockConfig,
        harness_config: &HarnessConfig,
    ) -> Self {
        let mutator = AtomicMutator::new(Arc::clone(&store), store_config.clone());
        Self {
            store,
            locks,
            mutator,
            store_config,
            lock_config,
            contention_window: harness_config.contention_window,
            locked_window: harness_config.locked_window,
        }
    }

    fn resource_key(&self, resource_id: &str) -> String {
        format!("{}{}", self.store_config.resource_key_prefix, resource_id)
    }

    fn stock_lock_key(resource_id: &str) -> String {
        format!("stock:{}", resource_id)
    }

    /// Write a resource record, replacing any existing one.
    pub async fn create(&self, resource: ContendedResource) -> Result<ContendedResource> {
        if resource.quantity < 0 {
            return Err(StockadeError::Internal(format!(
                "refusing to create {} with negative quantity",
                resource.id
            )));
        }
        let key = self.resource_key(&resource.id);
        self.store
            .set_with_expiry(
                &key,
                &serde_json::to_string(&resource)?,
                self.store_config.default_ttl,
            )
            .await?;
        debug!(resource_id = %resource.id, quantity = resource.quantity, "resource created");
        Ok(resource)
    }

    /// Read a resource snapshot.
    pub async fn get(&self, resource_id: &str) -> Result<Option<ContendedResource>> {
        let raw = self.store.get(&self.resource_key(resource_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Dispatch a decrement through the chosen strategy.
    pub async fn decrease(
        &self,
        strategy: DecrementStrategy,
        resource_id: &str,
        amount: i64,
    ) -> Result<DecrementResult> {
        match strategy {
            DecrementStrategy::Uncoordinated => {
                self.decrease_uncoordinated(resource_id, amount).await
            }
            DecrementStrategy::LeaseLock => self.decrease_with_lock(resource_id, amount).await,
            DecrementStrategy::AtomicScript => self.decrease_atomic(resource_id, amount).await,
        }
    }

    /// Plain read-modify-write with an injected delay between read and write.
    ///
    /// Concurrent callers interleave arbitrarily and lose updates; this path
    /// exists so the failure can be demonstrated, never for production use.
    pub async fn decrease_uncoordinated(
        &self,
        resource_id: &str,
        amount: i64,
    ) -> Result<DecrementResult> {
        let result = self
            .read_modify_write(resource_id, amount, self.contention_window)
            .await?;
        observability::record_decrement(DecrementStrategy::Uncoordinated, result.success);
        Ok(result)
    }

    /// Read-modify-write serialized by the store-resident lease lock. Every
    /// process sharing the store contends on the same `stock:{id}` key.
    pub async fn decrease_with_lock(
        &self,
        resource_id: &str,
        amount: i64,
    ) -> Result<DecrementResult> {
        let lock_key = Self::stock_lock_key(resource_id);
        let result = Arc::clone(&self.locks)
            .with_lock_or_fail(
                &lock_key,
                self.lock_config.default_wait_timeout,
                self.lock_config.default_lease_time,
                || self.read_modify_write(resource_id, amount, self.locked_window),
            )
            .await?;
        observability::record_decrement(DecrementStrategy::LeaseLock, result.success);
        Ok(result)
    }

    /// One indivisible check-and-decrement executed by the store.
    pub async fn decrease_atomic(&self, resource_id: &str, amount: i64) -> Result<DecrementResult> {
        let result = self.mutator.decrement_if_sufficient(resource_id, amount).await?;
        if result.reason == Some(DecrementRejection::NotFound) {
            return Err(StockadeError::ResourceNotFound(resource_id.to_string()));
        }
        Ok(result)
    }

    async fn read_modify_write(
        &self,
        resource_id: &str,
        amount: i64,
        window: Duration,
    ) -> Result<DecrementResult> {
        let key = self.resource_key(resource_id);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| StockadeError::ResourceNotFound(resource_id.to_string()))?;
        let mut resource: ContendedResource = serde_json::from_str(&raw)?;
        let previous = resource.quantity;

        if previous < amount {
            return Ok(DecrementResult::refused(
                resource_id,
                previous,
                amount,
                DecrementRejection::InsufficientQuantity,
            ));
        }

        // Widen the read-to-write gap so interleavings are reproducible.
        if !window.is_zero() {
            tokio::time::sleep(window).await;
        }

        resource.quantity = previous - amount;
        self.store
            .set_with_expiry(
                &key,
                &serde_json::to_string(&resource)?,
                self.store_config.default_ttl,
            )
            .await?;

        Ok(DecrementResult::applied(resource_id, previous, amount))
    }
}
