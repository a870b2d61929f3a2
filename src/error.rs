//! Error types for the Stockade coordination core.
//!
//! This module provides a unified error type [`StockadeError`] for all Stockade
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors are organized into the following categories:
//!
//! - **Domain**: Unknown resource ids
//! - **Locking**: Bounded acquisition that ran out of time
//! - **Store**: The shared store being unreachable or replying with garbage
//! - **Configuration**: Invalid settings or missing configuration
//!
//! An insufficient quantity is deliberately *not* an error: a refused decrement
//! is a domain result ([`crate::types::DecrementResult`] with `success == false`)
//! so that callers measuring contention can count it instead of catching it.
//!
//! # Example
//!
//! ```rust
//! use stockade::error::{Result, StockadeError};
//!
//! fn lookup(id: &str) -> Result<u64> {
//!     if id.is_empty() {
//!         return Err(StockadeError::ResourceNotFound("<empty>".into()));
//!     }
//!     Ok(42)
//! }
//!
//! fn handle_error(err: &StockadeError) {
//!     if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for Stockade operations.
#[derive(Error, Debug)]
pub enum StockadeError {
    // Domain errors
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    // Locking errors
    #[error("Lock not acquired within wait timeout: {0}")]
    LockAcquisitionTimeout(String),

    // Store errors
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Malformed script reply: {0}")]
    MalformedScriptReply(String),

    #[error("Unknown script: {0}")]
    UnknownScript(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StockadeError {
    /// Check if error is retryable.
    ///
    /// Only infrastructure-level store failures are worth retrying; a missing
    /// resource or an acquisition timeout reflects a decision the store already
    /// made and asking again without new information changes nothing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StockadeError::StoreUnavailable(_))
    }

    /// True for errors that mean the store itself misbehaved, including replies
    /// that failed shape validation at the client boundary.
    pub fn is_store_fault(&self) -> bool {
        matches!(
            self,
            StockadeError::StoreUnavailable(_)
                | StockadeError::MalformedScriptReply(_)
                | StockadeError::UnknownScript(_)
        )
    }
}

impl From<serde_json::Error> for StockadeError {
    fn from(e: serde_json::Error) -> Self {
        StockadeError::Serialization(e.to_string())
    }
}

/// Result type alias for Stockade operations.
pub type Result<T> = std::result::Result<T, StockadeError>;
