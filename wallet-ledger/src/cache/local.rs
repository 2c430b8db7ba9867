//! Process-local cache backed by moka
//!
//! Each entry carries its own TTL, so one cache can serve values written
//! with different lifetimes.

use super::LocalCache;
use crate::metrics::{Metrics, TIER_LOCAL};
use crate::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default cache capacity (entries)
const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

struct EntryTtl;

impl<V> Expiry<String, Entry<V>> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Entry<V>, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Typed in-memory cache shared by all tasks in the process
pub struct MokaLocalCache<V> {
    cache: Cache<String, Entry<V>>,
    metrics: Option<Metrics>,
}

impl<V> MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache bounded to `capacity` entries
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .expire_after(EntryTtl)
                .build(),
            metrics: None,
        }
    }

    /// Record hits and misses on the given collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<V> Default for MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> LocalCache<V> for MokaLocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Option<V> {
        let hit = self.cache.get(key).await.map(|entry| entry.value);
        if let Some(metrics) = &self.metrics {
            if hit.is_some() {
                metrics.record_hit(TIER_LOCAL);
            } else {
                metrics.record_miss(TIER_LOCAL);
            }
        }
        hit
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) {
        self.cache.insert(key.to_string(), Entry { value, ttl }).await;
    }

    async fn delete(&self, key: &str) -> bool {
        self.cache.remove(key).await.is_some()
    }

    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<V>>,
    ) -> Result<V> {
        if let Some(value) = self.get(key).await {
            debug!(key, "local cache hit");
            return Ok(value);
        }

        let value = loader.await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LedgerError;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MokaLocalCache::<u32>::new();
        cache.set("k", 7, Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(7));

        assert!(cache.delete("k").await);
        assert_eq!(cache.get("k").await, None);

        // Deleting an absent key is a no-op
        assert!(!cache.delete("k").await);
    }

    #[tokio::test]
    async fn test_entry_expires_after_its_ttl() {
        let cache = MokaLocalCache::<u32>::new();
        cache.set("short", 1, Duration::from_millis(30)).await;
        cache.set("long", 2, Duration::from_secs(60)).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("short").await, None);
        assert_eq!(cache.get("long").await, Some(2));
    }

    #[tokio::test]
    async fn test_fetch_populates_once() {
        let cache = MokaLocalCache::<String>::new();

        let first = cache
            .fetch("user", Duration::from_secs(60), Box::pin(async { Ok("alice".to_string()) }))
            .await
            .unwrap();
        assert_eq!(first, "alice");

        // Served from the cache; the loader's error is never seen
        let second = cache
            .fetch(
                "user",
                Duration::from_secs(60),
                Box::pin(async { Err(LedgerError::Store("unreachable".into())) }),
            )
            .await
            .unwrap();
        assert_eq!(second, "alice");
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_no_entry() {
        let cache = MokaLocalCache::<u32>::new();
        let result = cache
            .fetch(
                "k",
                Duration::from_secs(60),
                Box::pin(async { Err(LedgerError::Store("down".into())) }),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(cache.get("k").await, None);
    }
}
