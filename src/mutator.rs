//! Atomic check-and-decrement.
//!
//! [`AtomicMutator`] executes the whole read/check/write of a quantity as one
//! server-side script, so the store linearizes it: no lock round trip, no
//! waiting, and a crashed caller cannot leave anyone blocked. Strictly the
//! fastest of the three decrement strategies and equal in correctness to the
//! lock-based one.

use crate::config::StoreConfig;
use crate::error::{Result, StockadeError};
use crate::observability;
use crate::store::{ResourceStore, ScriptId};
use crate::types::{DecrementRejection, DecrementResult, DecrementStrategy};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Raw script reply, validated at the client boundary. Any shape the store
/// hands back that does not fit is an infrastructure fault, never a domain
/// result.
#[derive(Debug, Deserialize)]
struct DecrementReply {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    previous_quantity: Option<i64>,
    #[serde(default)]
    current_quantity: Option<i64>,
}

/// Single-round-trip check-and-decrement over the shared store.
pub struct AtomicMutator {
    store: Arc<dyn ResourceStore>,
    config: StoreConfig,
}

impl AtomicMutator {
    /// Create a mutator over a shared store.
    pub fn new(store: Arc<dyn ResourceStore>, config: StoreConfig) -> Self {
        Self { store, config }
    }

    fn resource_key(&self, resource_id: &str) -> String {
        format!("{}{}", self.config.resource_key_prefix, resource_id)
    }

    /// Decrement `resource_id` by `amount` if the current quantity covers it.
    ///
    /// Runs as one indivisible operation: either the decrement applies in full
    /// or the quantity is untouched. The quantity can never go negative, for
    /// any interleaving of concurrent callers.
    pub async fn decrement_if_sufficient(
        &self,
        resource_id: &str,
        amount: i64,
    ) -> Result<DecrementResult> {
        let keys = vec![self.resource_key(resource_id)];
        let args = vec![amount.to_string()];
        let raw = self
            .store
            .run_atomic_script(ScriptId::DecrementIfSufficient, &keys, &args)
            .await?;
        let reply: DecrementReply = serde_json::from_value(raw).map_err(|e| {
            StockadeError::MalformedScriptReply(format!("decrement_if_sufficient: {}", e))
        })?;

        let result = Self::validate(resource_id, amount, reply)?;
        observability::record_decrement(DecrementStrategy::AtomicScript, result.success);
        debug!(
            resource_id,
            amount,
            success = result.success,
            current = result.current_quantity,
            "atomic decrement"
        );
        Ok(result)
    }

    fn validate(resource_id: &str, amount: i64, reply: DecrementReply) -> Result<DecrementResult> {
        if reply.success {
            let previous = reply.previous_quantity.ok_or_else(|| {
                StockadeError::MalformedScriptReply(
                    "successful decrement without previous_quantity".to_string(),
                )
            })?;
            let current = reply.current_quantity.ok_or_else(|| {
                StockadeError::MalformedScriptReply(
                    "successful decrement without current_quantity".to_string(),
                )
            })?;
            if current != previous - amount || current < 0 {
                return Err(StockadeError::MalformedScriptReply(format!(
                    "inconsistent decrement arithmetic: {} -> {} by {}",
                    previous, current, amount
                )));
            }
            return Ok(DecrementResult::applied(
                reply.resource_id.unwrap_or_else(|| resource_id.to_string()),
                previous,
                amount,
            ));
        }

        match reply.reason.as_deref() {
            Some("not_found") => Ok(DecrementResult::refused(
                resource_id,
                0,
                amount,
                DecrementRejection::NotFound,
            )),
            Some("insufficient_quantity") => {
                let current = reply.current_quantity.ok_or_else(|| {
                    StockadeError::MalformedScriptReply(
                        "refused decrement without current_quantity".to_string(),
                    )
                })?;
                Ok(DecrementResult::refused(
                    reply.resource_id.unwrap_or_else(|| resource_id.to_string()),
                    current,
                    amount,
                    DecrementRejection::InsufficientQuantity,
                ))
            }
            other => Err(StockadeError::MalformedScriptReply(format!(
                "unrecognized rejection reason: {:?}",
                other
            ))),
        }
    }
}
