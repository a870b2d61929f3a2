//! Shared store abstraction.
//!
//! [`ResourceStore`] is the seam between the coordination core and whatever
//! key-value store the deployment shares (Redis, a cluster-local KV service,
//! or the in-process [`MemoryStore`] used by tests and demos). All operations
//! are assumed linearizable; atomic scripts execute as one indivisible step
//! with no observable intermediate state.

use crate::error::{Result, StockadeError};
use crate::types::ValueWithTtl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Server-side scripts the store can execute atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptId {
    /// Claim or re-enter a lease. keys: `[lock_key]`, args: `[owner, lease_ms]`.
    AcquireLease,
    /// Drop one hold on a lease. keys: `[lock_key]`, args: `[owner]`.
    ReleaseLease,
    /// Check-and-decrement a resource quantity. keys: `[resource_key]`,
    /// args: `[amount]`.
    DecrementIfSufficient,
}

impl ScriptId {
    /// Stable identifier, e.g. for script registration against a real store.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptId::AcquireLease => "acquire_lease",
            ScriptId::ReleaseLease => "release_lease",
            ScriptId::DecrementIfSufficient => "decrement_if_sufficient",
        }
    }
}

/// Store-resident lock state. Lease expiry is the entry's TTL; the store is
/// authoritative for it because the holder may crash without releasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Owner token of the current holder.
    pub owner: String,
    /// Reentrant hold depth. Zero means fully released but not yet deleted.
    pub hold_count: u32,
}

/// Minimal linearizable key-value interface consumed by the coordination core.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read a key. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Read a key together with its remaining TTL.
    async fn get_with_ttl(&self, key: &str) -> Result<ValueWithTtl<String>>;

    /// Write a key with an expiry.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Delete a lease entry only if `owner` still holds it. Returns whether a
    /// deletion happened.
    async fn compare_and_delete_if_owner(&self, key: &str, owner: &str) -> Result<bool>;

    /// Execute a registered script atomically and return its structured reply.
    async fn run_atomic_script(
        &self,
        script: ScriptId,
        keys: &[String],
        args: &[String],
    ) -> Result<serde_json::Value>;
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process store backed by a single mutex, which makes every operation
/// trivially linearizable. Stands in for the shared store in tests and the
/// concurrency harness; connection bootstrap for a real store lives outside
/// this crate.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn script_arg<'a>(args: &'a [String], idx: usize, script: ScriptId) -> Result<&'a str> {
        args.get(idx).map(String::as_str).ok_or_else(|| {
            StockadeError::Internal(format!(
                "script {} missing argument {}",
                script.as_str(),
                idx
            ))
        })
    }

    fn script_key<'a>(keys: &'a [String], script: ScriptId) -> Result<&'a str> {
        keys.first().map(String::as_str).ok_or_else(|| {
            StockadeError::Internal(format!("script {} requires a key", script.as_str()))
        })
    }

    fn acquire_lease(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        owner: &str,
        lease: Duration,
        now: Instant,
    ) -> Result<serde_json::Value> {
        if let Some(entry) = entries.get(key) {
            if !entry.is_expired(now) {
                let record: LeaseRecord = serde_json::from_str(&entry.value)?;
                if record.hold_count > 0 && record.owner == owner {
                    // Reentry: bump the hold count but leave the expiry alone;
                    // the outer acquisition's lease stays authoritative.
                    let bumped = LeaseRecord {
                        owner: record.owner,
                        hold_count: record.hold_count + 1,
                    };
                    let value = serde_json::to_string(&bumped)?;
                    let expires_at = entry.expires_at;
                    entries.insert(key.to_string(), Entry { value, expires_at });
                    return Ok(serde_json::json!({
                        "acquired": true,
                        "hold_count": bumped.hold_count,
                    }));
                }
                if record.hold_count > 0 {
                    return Ok(serde_json::json!({
                        "acquired": false,
                        "hold_count": record.hold_count,
                    }));
                }
                // hold_count == 0: fully released, deletion pending. Claimable.
            }
        }

        let record = LeaseRecord {
            owner: owner.to_string(),
            hold_count: 1,
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::to_string(&record)?,
                expires_at: Some(now + lease),
            },
        );
        Ok(serde_json::json!({ "acquired": true, "hold_count": 1 }))
    }

    fn release_lease(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        owner: &str,
        now: Instant,
    ) -> Result<serde_json::Value> {
        let not_held = serde_json::json!({ "released": false, "remaining": 0 });

        let Some(entry) = entries.get(key) else {
            return Ok(not_held);
        };
        if entry.is_expired(now) {
            return Ok(not_held);
        }

        let record: LeaseRecord = serde_json::from_str(&entry.value)?;
        if record.owner != owner || record.hold_count == 0 {
            return Ok(not_held);
        }

        let remaining = record.hold_count - 1;
        let updated = LeaseRecord {
            owner: record.owner,
            hold_count: remaining,
        };
        let expires_at = entry.expires_at;
        entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::to_string(&updated)?,
                expires_at,
            },
        );
        Ok(serde_json::json!({ "released": true, "remaining": remaining }))
    }

    fn decrement_if_sufficient(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        amount: i64,
        now: Instant,
    ) -> Result<serde_json::Value> {
        let Some(entry) = entries.get(key) else {
            return Ok(serde_json::json!({ "success": false, "reason": "not_found" }));
        };
        if entry.is_expired(now) {
            return Ok(serde_json::json!({ "success": false, "reason": "not_found" }));
        }

        let mut value: serde_json::Value = serde_json::from_str(&entry.value)?;
        let quantity = value
            .get("quantity")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| {
                StockadeError::Serialization(format!("stored value at {} has no quantity", key))
            })?;
        let resource_id = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .unwrap_or(key)
            .to_string();

        if quantity < amount {
            return Ok(serde_json::json!({
                "success": false,
                "reason": "insufficient_quantity",
                "resource_id": resource_id,
                "previous_quantity": quantity,
                "requested_amount": amount,
                "current_quantity": quantity,
            }));
        }

        value["quantity"] = serde_json::json!(quantity - amount);
        let expires_at = entry.expires_at;
        entries.insert(
            key.to_string(),
            Entry {
                value: serde_json::to_string(&value)?,
                expires_at,
            },
        );

        Ok(serde_json::json!({
            "success": true,
            "resource_id": resource_id,
            "previous_quantity": quantity,
            "requested_amount": amount,
            "current_quantity": quantity - amount,
        }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone()))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<ValueWithTtl<String>> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(ValueWithTtl {
                value: Some(entry.value.clone()),
                ttl: entry.expires_at.map(|at| at - now),
            }),
            _ => Ok(ValueWithTtl::absent()),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn compare_and_delete_if_owner(&self, key: &str, owner: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let matches = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let record: LeaseRecord = serde_json::from_str(&entry.value)?;
                record.owner == owner
            }
            _ => false,
        };
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn run_atomic_script(
        &self,
        script: ScriptId,
        keys: &[String],
        args: &[String],
    ) -> Result<serde_json::Value> {
        // One mutex for the whole map: every script runs as a single
        // indivisible step, which is exactly the guarantee a real store's
        // server-side script gives.
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let key = Self::script_key(keys, script)?;

        match script {
            ScriptId::AcquireLease => {
                let owner = Self::script_arg(args, 0, script)?;
                let lease_ms: u64 = Self::script_arg(args, 1, script)?
                    .parse()
                    .map_err(|_| {
                        StockadeError::Internal("acquire_lease lease must be millis".to_string())
                    })?;
                Self::acquire_lease(&mut entries, key, owner, Duration::from_millis(lease_ms), now)
            }
            ScriptId::ReleaseLease => {
                let owner = Self::script_arg(args, 0, script)?;
                Self::release_lease(&mut entries, key, owner, now)
            }
            ScriptId::DecrementIfSufficient => {
                let amount: i64 = Self::script_arg(args, 0, script)?.parse().map_err(|_| {
                    StockadeError::Internal(
                        "decrement_if_sufficient amount must be an integer".to_string(),
                    )
                })?;
                Self::decrement_if_sufficient(&mut entries, key, amount, now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquire_args(owner: &str, lease: Duration) -> Vec<String> {
        vec![owner.to_string(), lease.as_millis().to_string()]
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.get_with_ttl("k").await.unwrap().value, None);
    }

    #[tokio::test]
    async fn test_get_with_ttl_reports_remaining() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        let read = store.get_with_ttl("k").await.unwrap();
        assert_eq!(read.value, Some("v".to_string()));
        let ttl = read.ttl.unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_acquire_lease_mutual_exclusion() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];

        let reply = store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-a", Duration::from_secs(30)),
            )
            .await
            .unwrap();
        assert_eq!(reply["acquired"], true);

        let reply = store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-b", Duration::from_secs(30)),
            )
            .await
            .unwrap();
        assert_eq!(reply["acquired"], false);
    }

    #[tokio::test]
    async fn test_acquire_lease_reentry_bumps_hold_count() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];
        let args = acquire_args("owner-a", Duration::from_secs(30));

        store
            .run_atomic_script(ScriptId::AcquireLease, &keys, &args)
            .await
            .unwrap();
        let reply = store
            .run_atomic_script(ScriptId::AcquireLease, &keys, &args)
            .await
            .unwrap();
        assert_eq!(reply["acquired"], true);
        assert_eq!(reply["hold_count"], 2);
    }

    #[tokio::test]
    async fn test_reentry_does_not_extend_lease() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];

        store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-a", Duration::from_millis(50)),
            )
            .await
            .unwrap();
        // Nested entry asks for a much longer lease; the outer expiry must win.
        store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-a", Duration::from_secs(60)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let reply = store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-b", Duration::from_secs(30)),
            )
            .await
            .unwrap();
        assert_eq!(reply["acquired"], true);
    }

    #[tokio::test]
    async fn test_release_lease_counts_down() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];
        let acquire = acquire_args("owner-a", Duration::from_secs(30));

        store
            .run_atomic_script(ScriptId::AcquireLease, &keys, &acquire)
            .await
            .unwrap();
        store
            .run_atomic_script(ScriptId::AcquireLease, &keys, &acquire)
            .await
            .unwrap();

        let release = vec!["owner-a".to_string()];
        let reply = store
            .run_atomic_script(ScriptId::ReleaseLease, &keys, &release)
            .await
            .unwrap();
        assert_eq!(reply["released"], true);
        assert_eq!(reply["remaining"], 1);

        let reply = store
            .run_atomic_script(ScriptId::ReleaseLease, &keys, &release)
            .await
            .unwrap();
        assert_eq!(reply["remaining"], 0);
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_refused() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];
        store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-a", Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let reply = store
            .run_atomic_script(ScriptId::ReleaseLease, &keys, &["owner-b".to_string()])
            .await
            .unwrap();
        assert_eq!(reply["released"], false);
    }

    #[tokio::test]
    async fn test_compare_and_delete_checks_owner() {
        let store = MemoryStore::new();
        let keys = vec!["lock:k".to_string()];
        store
            .run_atomic_script(
                ScriptId::AcquireLease,
                &keys,
                &acquire_args("owner-a", Duration::from_secs(30)),
            )
            .await
            .unwrap();

        assert!(!store
            .compare_and_delete_if_owner("lock:k", "owner-b")
            .await
            .unwrap());
        assert!(store
            .compare_and_delete_if_owner("lock:k", "owner-a")
            .await
            .unwrap());
        assert_eq!(store.get("lock:k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_decrement_script_floor() {
        let store = MemoryStore::new();
        store
            .set_with_expiry(
                "product:sku-1",
                r#"{"id":"sku-1","name":"widget","quantity":2,"unit_price":100}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let keys = vec!["product:sku-1".to_string()];
        let reply = store
            .run_atomic_script(ScriptId::DecrementIfSufficient, &keys, &["5".to_string()])
            .await
            .unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["reason"], "insufficient_quantity");
        assert_eq!(reply["current_quantity"], 2);

        // Quantity untouched.
        let raw = store.get("product:sku-1").await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["quantity"], 2);
    }

    #[tokio::test]
    async fn test_decrement_script_applies_and_reports() {
        let store = MemoryStore::new();
        store
            .set_with_expiry(
                "product:sku-1",
                r#"{"id":"sku-1","name":"widget","quantity":10,"unit_price":100}"#,
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let keys = vec!["product:sku-1".to_string()];
        let reply = store
            .run_atomic_script(ScriptId::DecrementIfSufficient, &keys, &["3".to_string()])
            .await
            .unwrap();
        assert_eq!(reply["success"], true);
        assert_eq!(reply["previous_quantity"], 10);
        assert_eq!(reply["current_quantity"], 7);
        assert_eq!(reply["resource_id"], "sku-1");
    }

    #[tokio::test]
    async fn test_decrement_script_missing_key() {
        let store = MemoryStore::new();
        let keys = vec!["product:ghost".to_string()];
        let reply = store
            .run_atomic_script(ScriptId::DecrementIfSufficient, &keys, &["1".to_string()])
            .await
            .unwrap();
        assert_eq!(reply["success"], false);
        assert_eq!(reply["reason"], "not_found");
    }
}
