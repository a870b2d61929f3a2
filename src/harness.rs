//! Concurrency verification harness.
//!
//! Drives N simultaneous decrement attempts through a chosen strategy and
//! checks the resulting quantity against the analytically expected value. The
//! harness measures; it never fails fast: every per-worker outcome, including
//! panics, is counted and the run always produces a report.

use crate::config::HarnessConfig;
use crate::error::{Result, StockadeError};
use crate::resource::ResourceManager;
use crate::types::{ConcurrencyTestReport, ConcurrencyTestSpec, DecrementStrategy};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Drives concurrent decrement attempts and aggregates a report.
pub struct ConcurrencyHarness {
    resources: Arc<ResourceManager>,
    config: HarnessConfig,
}

enum WorkerOutcome {
    Applied,
    Refused,
    Errored,
}

impl ConcurrencyHarness {
    /// Create a harness over a resource manager.
    pub fn new(resources: Arc<ResourceManager>, config: HarnessConfig) -> Self {
        Self { resources, config }
    }

    /// Run `spec.concurrency` simultaneous decrements via `strategy` and
    /// report whether the final quantity matches the analytic expectation.
    ///
    /// Workers run on a pool bounded by `min(concurrency, max_workers)`. The
    /// wait for all workers to finish is intentionally unbounded; correctness
    /// cannot be judged before the last one completes.
    pub async fn run_test(
        &self,
        spec: &ConcurrencyTestSpec,
        strategy: DecrementStrategy,
    ) -> Result<ConcurrencyTestReport> {
        if spec.concurrency == 0 || spec.amount_per_worker < 1 {
            return Err(StockadeError::InvalidConfig {
                field: "spec".to_string(),
                reason: "concurrency and amount_per_worker must be at least 1".to_string(),
            });
        }

        let initial = self
            .resources
            .get(&spec.resource_id)
            .await?
            .ok_or_else(|| StockadeError::ResourceNotFound(spec.resource_id.clone()))?
            .quantity;
        let expected = initial - (spec.concurrency as i64) * spec.amount_per_worker;

        let pool = Arc::new(Semaphore::new(spec.concurrency.min(self.config.max_workers)));
        let started = Instant::now();

        let mut handles = Vec::with_capacity(spec.concurrency);
        for _ in 0..spec.concurrency {
            let resources = Arc::clone(&self.resources);
            let pool = Arc::clone(&pool);
            let resource_id = spec.resource_id.clone();
            let amount = spec.amount_per_worker;

            handles.push(tokio::spawn(async move {
                // The semaphore is never closed while workers run.
                let _permit = pool.acquire_owned().await.expect("worker pool closed");
                match resources.decrease(strategy, &resource_id, amount).await {
                    Ok(result) if result.success => WorkerOutcome::Applied,
                    Ok(_) => WorkerOutcome::Refused,
                    Err(_) => WorkerOutcome::Errored,
                }
            }));
        }

        let mut success_count = 0;
        let mut fail_count = 0;
        for handle in handles {
            match handle.await {
                Ok(WorkerOutcome::Applied) => success_count += 1,
                Ok(WorkerOutcome::Refused) | Ok(WorkerOutcome::Errored) => fail_count += 1,
                Err(join_err) => {
                    warn!(error = %join_err, "worker panicked; counting as failure");
                    fail_count += 1;
                }
            }
        }

        let elapsed = started.elapsed();
        let actual = self
            .resources
            .get(&spec.resource_id)
            .await?
            .map(|r| r.quantity)
            .unwrap_or(0);

        let report = ConcurrencyTestReport {
            strategy,
            initial_quantity: initial,
            expected_final_quantity: expected,
            actual_final_quantity: actual,
            success_count,
            fail_count,
            elapsed,
            consistent: actual == expected,
        };

        info!(
            strategy = %strategy,
            initial,
            expected,
            actual,
            success_count,
            fail_count,
            elapsed_ms = elapsed.as_millis() as u64,
            consistent = report.consistent,
            "concurrency test finished"
        );
        Ok(report)
    }
}
