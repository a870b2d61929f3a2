//! Core types shared across the Stockade coordination core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A shared, mutable inventory record. The authoritative copy lives in the
/// store; this struct is only ever a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContendedResource {
    /// Resource identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Current quantity. Never negative in the store.
    pub quantity: i64,
    /// Unit price in minor currency units.
    pub unit_price: u64,
}

impl ContendedResource {
    /// Create a new resource snapshot.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        quantity: i64,
        unit_price: u64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            quantity,
            unit_price,
        }
    }
}

/// Why a decrement was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecrementRejection {
    /// The resource id is unknown to the store.
    NotFound,
    /// The requested amount exceeds the current quantity.
    InsufficientQuantity,
}

/// Outcome of a single decrement attempt.
///
/// `success == false` means the store state is unchanged; `reason` says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecrementResult {
    /// Resource the attempt targeted.
    pub resource_id: String,
    /// Quantity observed before the attempt.
    pub previous_quantity: i64,
    /// Amount the caller asked to remove.
    pub requested_amount: i64,
    /// Quantity after the attempt (unchanged on refusal).
    pub current_quantity: i64,
    /// Whether the decrement was applied.
    pub success: bool,
    /// Set when `success == false`.
    pub reason: Option<DecrementRejection>,
}

impl DecrementResult {
    /// A successfully applied decrement.
    pub fn applied(resource_id: impl Into<String>, previous: i64, amount: i64) -> Self {
        Self {
            resource_id: resource_id.into(),
            previous_quantity: previous,
            requested_amount: amount,
            current_quantity: previous - amount,
            success: true,
            reason: None,
        }
    }

    /// A refused decrement; store state is unchanged.
    pub fn refused(
        resource_id: impl Into<String>,
        current: i64,
        amount: i64,
        reason: DecrementRejection,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            previous_quantity: current,
            requested_amount: amount,
            current_quantity: current,
            success: false,
            reason: Some(reason),
        }
    }
}

/// How concurrent decrements against the same resource are coordinated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecrementStrategy {
    /// Plain read-modify-write. Loses updates under contention; exists to be
    /// demonstrated against, never for production paths.
    Uncoordinated,
    /// Serialize mutations through the store-resident lease lock.
    LeaseLock,
    /// One indivisible check-and-decrement executed by the store.
    AtomicScript,
}

impl std::fmt::Display for DecrementStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecrementStrategy::Uncoordinated => write!(f, "uncoordinated"),
            DecrementStrategy::LeaseLock => write!(f, "lease_lock"),
            DecrementStrategy::AtomicScript => write!(f, "atomic_script"),
        }
    }
}

/// Parameters for one concurrency test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyTestSpec {
    /// Resource to hammer.
    pub resource_id: String,
    /// Number of simultaneous decrement attempts.
    pub concurrency: usize,
    /// Amount each attempt removes.
    pub amount_per_worker: i64,
}

impl ConcurrencyTestSpec {
    /// Create a test spec.
    pub fn new(resource_id: impl Into<String>, concurrency: usize, amount_per_worker: i64) -> Self {
        Self {
            resource_id: resource_id.into(),
            concurrency,
            amount_per_worker,
        }
    }
}

/// Aggregated result of a concurrency test run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyTestReport {
    /// Strategy the run exercised.
    pub strategy: DecrementStrategy,
    /// Quantity before any worker started.
    pub initial_quantity: i64,
    /// `initial - concurrency * amount_per_worker`, computed analytically.
    /// May be negative when the spec oversubscribes the quantity.
    pub expected_final_quantity: i64,
    /// Quantity re-read after every worker finished.
    pub actual_final_quantity: i64,
    /// Attempts that applied their decrement.
    pub success_count: usize,
    /// Attempts that were refused or errored.
    pub fail_count: usize,
    /// Wall-clock time from first submission to last completion.
    pub elapsed: Duration,
    /// Whether the actual final quantity matched the analytic expectation.
    pub consistent: bool,
}

impl ConcurrencyTestReport {
    /// Updates that were issued but left no trace in the final quantity.
    pub fn lost_updates(&self) -> i64 {
        self.actual_final_quantity - self.expected_final_quantity
    }
}

/// A value read together with its remaining time-to-live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueWithTtl<T> {
    /// The value, if the key was present and unexpired.
    pub value: Option<T>,
    /// Remaining TTL, if the key carries one.
    pub ttl: Option<Duration>,
}

impl<T> ValueWithTtl<T> {
    /// An absent key.
    pub fn absent() -> Self {
        Self {
            value: None,
            ttl: None,
        }
    }
}
