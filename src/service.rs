//! Upward-facing facade.
//!
//! [`CoordinationService`] is what an API layer embeds: thin pass-throughs
//! over the resource manager, lock coordinator, and concurrency harness. No
//! transport shape lives here.

use crate::config::StockadeConfig;
use crate::error::Result;
use crate::harness::ConcurrencyHarness;
use crate::lock::{LockCoordinator, LockStatus};
use crate::resource::ResourceManager;
use crate::store::ResourceStore;
use crate::types::{
    ConcurrencyTestReport, ConcurrencyTestSpec, ContendedResource, DecrementResult,
    DecrementStrategy,
};
use std::sync::Arc;

/// Facade wiring the coordination core together over one shared store.
pub struct CoordinationService {
    locks: Arc<LockCoordinator>,
    resources: Arc<ResourceManager>,
    harness: ConcurrencyHarness,
}

impl CoordinationService {
    /// Wire the core over a shared store.
    pub fn new(store: Arc<dyn ResourceStore>, config: StockadeConfig) -> Self {
        let locks = Arc::new(LockCoordinator::new(
            Arc::clone(&store),
            config.lock.clone(),
        ));
        let resources = Arc::new(ResourceManager::new(
            store,
            Arc::clone(&locks),
            config.store.clone(),
            config.lock.clone(),
            &config.harness,
        ));
        let harness = ConcurrencyHarness::new(Arc::clone(&resources), config.harness.clone());
        Self {
            locks,
            resources,
            harness,
        }
    }

    /// Create or replace a resource record.
    pub async fn create_resource(&self, resource: ContendedResource) -> Result<ContendedResource> {
        self.resources.create(resource).await
    }

    /// Read a resource snapshot.
    pub async fn get_resource(&self, resource_id: &str) -> Result<Option<ContendedResource>> {
        self.resources.get(resource_id).await
    }

    /// Decrement a resource through the chosen strategy.
    pub async fn decrease(
        &self,
        strategy: DecrementStrategy,
        resource_id: &str,
        amount: i64,
    ) -> Result<DecrementResult> {
        self.resources.decrease(strategy, resource_id, amount).await
    }

    /// Run a concurrency test and return its report.
    pub async fn run_concurrency_test(
        &self,
        spec: &ConcurrencyTestSpec,
        strategy: DecrementStrategy,
    ) -> Result<ConcurrencyTestReport> {
        self.harness.run_test(spec, strategy).await
    }

    /// Observational lock status for a key.
    pub async fn lock_status(&self, key: &str) -> Result<LockStatus> {
        self.locks.status(key).await
    }

    /// The underlying lock coordinator, for callers that manage locks
    /// directly.
    pub fn locks(&self) -> &Arc<LockCoordinator> {
        &self.locks
    }
}
