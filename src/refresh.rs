//! Probabilistic early cache refresh.
//!
//! Read-through access that occasionally renews an entry before its TTL
//! lapses, so a hot key is unlikely to expire under load and stampede the
//! backing source. The renewal runs as a detached background task; its failure
//! or non-completion never affects the read that triggered it.

use crate::config::RefreshConfig;
use crate::error::Result;
use crate::observability;
use crate::store::ResourceStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Read-through cache with probabilistic early renewal.
pub struct EarlyRefresher {
    store: Arc<dyn ResourceStore>,
    config: RefreshConfig,
}

impl EarlyRefresher {
    /// Create a refresher over a shared store.
    pub fn new(store: Arc<dyn ResourceStore>, config: RefreshConfig) -> Self {
        Self { store, config }
    }

    /// Refresh probability given the remaining TTL: highest as expiry nears,
    /// decaying exponentially with each remaining second.
    pub fn refresh_probability(&self, remaining_ttl: Duration) -> f64 {
        self.config.base_probability * (-self.config.decay_rate * remaining_ttl.as_secs_f64()).exp()
    }

    /// Read `key`, loading through `loader` on a miss.
    ///
    /// On a hit the cached value is returned immediately and a detached task
    /// may re-run the loader to renew the entry early; the caller never
    /// observes that task's outcome. On a miss the loader runs inline and a
    /// `Some` result is stored with the configured TTL.
    pub async fn get_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<Option<String>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<String>>> + Send,
    {
        let read = self.store.get_with_ttl(key).await?;

        if let Some(value) = read.value {
            let probability = self.refresh_probability(read.ttl.unwrap_or(Duration::ZERO));
            self.spawn_renewal(key, probability, loader);
            return Ok(Some(value));
        }

        let loaded = loader().await?;
        if let Some(ref value) = loaded {
            self.store
                .set_with_expiry(key, value, self.config.ttl)
                .await?;
            debug!(key, "cache miss populated");
        }
        Ok(loaded)
    }

    /// Fire-and-forget renewal. The task owns everything it touches; nothing
    /// is reported back to the caller.
    fn spawn_renewal<F, Fut>(&self, key: &str, probability: f64, loader: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<String>>> + Send,
    {
        let store = Arc::clone(&self.store);
        let ttl = self.config.ttl;
        let key = key.to_string();

        tokio::spawn(async move {
            if rand::random::<f64>() >= probability {
                return;
            }
            observability::record_early_refresh();
            match loader().await {
                Ok(Some(value)) => {
                    if let Err(e) = store.set_with_expiry(&key, &value, ttl).await {
                        warn!(key, error = %e, "early refresh write failed");
                    } else {
                        debug!(key, "entry renewed early");
                    }
                }
                Ok(None) => debug!(key, "early refresh found no value; entry left to expire"),
                Err(e) => warn!(key, error = %e, "early refresh load failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refresher(base_probability: f64) -> EarlyRefresher {
        let config = RefreshConfig {
            base_probability,
            decay_rate: 0.1,
            ttl: Duration::from_secs(60),
        };
        EarlyRefresher::new(Arc::new(MemoryStore::new()), config)
    }

    #[tokio::test]
    async fn test_miss_loads_and_populates() {
        let refresher = refresher(0.0);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let value = refresher
            .get_or_load("k", move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Some("from-source".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(value, Some("from-source".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            refresher.store.get("k").await.unwrap(),
            Some("from-source".to_string())
        );
    }

    #[tokio::test]
    async fn test_hit_returns_cached_without_loading() {
        let refresher = refresher(0.0);
        refresher
            .store
            .set_with_expiry("k", "cached", Duration::from_secs(60))
            .await
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        let value = refresher
            .get_or_load("k", move || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Some("fresh".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(value, Some("cached".to_string()));
        // Zero base probability: the detached renewal never fires.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            refresher.store.get("k").await.unwrap(),
            Some("cached".to_string())
        );
    }

    #[tokio::test]
    async fn test_certain_renewal_rewrites_entry() {
        // Base probability 1.0 and a zero-decay curve make the renewal
        // deterministic.
        let config = RefreshConfig {
            base_probability: 1.0,
            decay_rate: 0.0,
            ttl: Duration::from_secs(60),
        };
        let refresher = EarlyRefresher::new(Arc::new(MemoryStore::new()), config);
        refresher
            .store
            .set_with_expiry("k", "stale", Duration::from_secs(60))
            .await
            .unwrap();

        let value = refresher
            .get_or_load("k", || async { Ok(Some("renewed".to_string())) })
            .await
            .unwrap();
        // The read itself still sees the cached value.
        assert_eq!(value, Some("stale".to_string()));

        // The detached task lands eventually.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if refresher.store.get("k").await.unwrap() == Some("renewed".to_string()) {
                return;
            }
        }
        panic!("renewal never landed");
    }

    #[tokio::test]
    async fn test_loader_miss_returns_none() {
        let refresher = refresher(0.0);
        let value = refresher
            .get_or_load("ghost", || async { Ok(None) })
            .await
            .unwrap();
        assert!(value.is_none());
        assert_eq!(refresher.store.get("ghost").await.unwrap(), None);
    }

    #[test]
    fn test_probability_decays_with_ttl() {
        let refresher = refresher(0.5);
        let near = refresher.refresh_probability(Duration::from_secs(1));
        let far = refresher.refresh_probability(Duration::from_secs(50));
        assert!(near > far);
        assert!((refresher.refresh_probability(Duration::ZERO) - 0.5).abs() < 1e-9);
    }
}
