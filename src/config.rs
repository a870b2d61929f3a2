//! Configuration module for Stockade.

use crate::error::{Result, StockadeError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration for the coordination core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockadeConfig {
    /// Store access configuration.
    pub store: StoreConfig,
    /// Lease lock configuration.
    pub lock: LockConfig,
    /// Concurrency harness configuration.
    pub harness: HarnessConfig,
    /// Probabilistic early refresh configuration.
    pub refresh: RefreshConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl StockadeConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StockadeError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| StockadeError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.store.default_ttl.is_zero() {
            return Err(StockadeError::InvalidConfig {
                field: "store.default_ttl".to_string(),
                reason: "TTL must be non-zero".to_string(),
            });
        }

        if self.lock.default_lease_time.is_zero() {
            return Err(StockadeError::InvalidConfig {
                field: "lock.default_lease_time".to_string(),
                reason: "Lease time must be non-zero".to_string(),
            });
        }

        if self.lock.retry_interval.is_zero() {
            return Err(StockadeError::InvalidConfig {
                field: "lock.retry_interval".to_string(),
                reason: "Retry interval must be non-zero".to_string(),
            });
        }

        if self.harness.max_workers == 0 {
            return Err(StockadeError::InvalidConfig {
                field: "harness.max_workers".to_string(),
                reason: "Worker pool must allow at least one worker".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.refresh.base_probability) {
            return Err(StockadeError::InvalidConfig {
                field: "refresh.base_probability".to_string(),
                reason: "Probability must be within [0, 1]".to_string(),
            });
        }

        Ok(())
    }

    /// Create a configuration suited to fast local testing: short waits, short
    /// leases, wide contention window so lost updates reproduce reliably.
    pub fn development() -> Self {
        Self {
            store: StoreConfig::default(),
            lock: LockConfig {
                key_prefix: "lock:".to_string(),
                default_wait_timeout: Duration::from_secs(10),
                default_lease_time: Duration::from_secs(30),
                retry_interval: Duration::from_millis(25),
            },
            harness: HarnessConfig {
                max_workers: 100,
                contention_window: Duration::from_millis(5),
                locked_window: Duration::from_millis(1),
            },
            refresh: RefreshConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Store access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key prefix for resource records.
    pub resource_key_prefix: String,
    /// Default TTL applied when writing resource records.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            resource_key_prefix: "product:".to_string(),
            default_ttl: Duration::from_secs(60),
        }
    }
}

/// Lease lock configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Key prefix for lock records.
    pub key_prefix: String,
    /// How long `try_acquire` waits for a contended lock by default.
    #[serde(with = "humantime_serde")]
    pub default_wait_timeout: Duration,
    /// How long a granted lease lives without release by default.
    #[serde(with = "humantime_serde")]
    pub default_lease_time: Duration,
    /// Poll interval while waiting on a contended lock.
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock:".to_string(),
            default_wait_timeout: Duration::from_secs(10),
            default_lease_time: Duration::from_secs(30),
            retry_interval: Duration::from_millis(25),
        }
    }
}

/// Concurrency harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Upper bound on simultaneously running workers.
    pub max_workers: usize,
    /// Injected delay inside the uncoordinated read-modify-write, widening the
    /// window in which two workers read the same stale quantity.
    #[serde(with = "humantime_serde")]
    pub contention_window: Duration,
    /// Injected delay inside the locked critical section.
    #[serde(with = "humantime_serde")]
    pub locked_window: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_workers: 100,
            contention_window: Duration::from_millis(5),
            locked_window: Duration::from_millis(1),
        }
    }
}

/// Probabilistic early refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Base refresh probability when the TTL is about to lapse.
    pub base_probability: f64,
    /// Exponential decay applied per remaining TTL second.
    pub decay_rate: f64,
    /// TTL written when the refresher repopulates an entry.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_probability: 0.5,
            decay_rate: 0.1,
            ttl: Duration::from_secs(60),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}
