//! Observability module for Stockade.
//!
//! Provides logging initialization and metrics counters. The crate only
//! records; installing a metrics recorder/exporter is left to the embedding
//! service.

use crate::config::ObservabilityConfig;
use crate::error::{Result, StockadeError};
use crate::types::DecrementStrategy;
use metrics::counter;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize logging.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| StockadeError::Internal(format!("Failed to init logging: {}", e)))?;
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| StockadeError::Internal(format!("Failed to init logging: {}", e)))?;
    }

    info!("Observability initialized");
    Ok(())
}

/// Record a granted lock acquisition.
pub fn record_lock_acquired() {
    counter!("stockade_lock_acquired_total").increment(1);
}

/// Record an acquisition attempt that timed out.
pub fn record_lock_denied() {
    counter!("stockade_lock_denied_total").increment(1);
}

/// Record a lock release.
pub fn record_lock_released() {
    counter!("stockade_lock_released_total").increment(1);
}

/// Record a decrement attempt and its outcome.
pub fn record_decrement(strategy: DecrementStrategy, success: bool) {
    let outcome = if success { "applied" } else { "refused" };
    counter!(
        "stockade_decrements_total",
        "strategy" => strategy.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a fire-and-forget early refresh.
pub fn record_early_refresh() {
    counter!("stockade_early_refresh_total").increment(1);
}
