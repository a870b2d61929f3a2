//! Stockade - a coordination core for contended inventory.
//!
//! Stockade protects a shared, mutable quantity against corruption when many
//! independent processes read-modify-write it concurrently against one shared
//! store. It offers two correct coordination strategies and one intentionally
//! broken baseline, plus a harness that demonstrates the difference.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Stockade                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Facade: CoordinationService                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Strategies: uncoordinated | LockCoordinator | AtomicMutator│
//! ├─────────────────────────────────────────────────────────────┤
//! │  Verification: ConcurrencyHarness                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Store seam: ResourceStore (linearizable KV + scripts)      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lock and resource state live exclusively in the store; the process holds no
//! authoritative in-memory copy, which is what makes the lock work across
//! processes and lets lease expiry recover from crashed holders.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stockade::config::StockadeConfig;
//! use stockade::service::CoordinationService;
//! use stockade::store::MemoryStore;
//! use stockade::types::{ContendedResource, DecrementStrategy};
//!
//! #[tokio::main]
//! async fn main() -> stockade::Result<()> {
//!     let config = StockadeConfig::development();
//!     stockade::observability::init(&config.observability)?;
//!
//!     let service = CoordinationService::new(Arc::new(MemoryStore::new()), config);
//!     service
//!         .create_resource(ContendedResource::new("sku-1", "widget", 100, 2500))
//!         .await?;
//!     let result = service
//!         .decrease(DecrementStrategy::AtomicScript, "sku-1", 1)
//!         .await?;
//!     println!("remaining: {}", result.current_quantity);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod types;

pub mod harness;
pub mod lock;
pub mod mutator;
pub mod observability;
pub mod refresh;
pub mod resource;
pub mod service;
pub mod store;

// Re-exports
pub use error::{Result, StockadeError};
pub use types::*;
