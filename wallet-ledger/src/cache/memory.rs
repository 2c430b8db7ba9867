//! In-process stand-in for the distributed tier
//!
//! Behaves like the Redis cache (string payloads, per-key expiry, `DEL`
//! counts) and lets tests take the tier down or make deletes fail.

use super::DistributedCache;
use crate::metrics::{Metrics, TIER_DISTRIBUTED};
use crate::{LedgerError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Operation counters
#[derive(Debug, Default)]
pub struct CacheOps {
    pub gets: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
}

/// DashMap-backed distributed cache double
#[derive(Default)]
pub struct InMemoryDistributedCache {
    entries: DashMap<String, (String, Instant)>,
    unavailable: AtomicBool,
    fail_deletes: AtomicBool,
    ops: CacheOps,
    metrics: Option<Metrics>,
}

impl InMemoryDistributedCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Record hits and misses on the given collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Make every call fail as if the server were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make only deletes fail
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Whether a live entry exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Operation counters
    pub fn ops(&self) -> &CacheOps {
        &self.ops
    }

    fn live(&self, key: &str) -> Option<String> {
        let entry = self.entries.get(key)?;
        let (value, expires_at) = entry.value();
        if *expires_at > Instant::now() {
            Some(value.clone())
        } else {
            drop(entry);
            self.entries.remove(key);
            None
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(LedgerError::Cache("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.ops.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.live(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.ops.sets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        self.ops.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(LedgerError::Cache("DEL rejected".to_string()));
        }
        Ok(self.entries.remove(key).map_or(0, |_| 1))
    }

    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<String>>,
    ) -> Result<String> {
        match self.get(key).await {
            Ok(Some(json)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_hit(TIER_DISTRIBUTED);
                }
                debug!(key, "distributed cache hit");
                return Ok(json);
            }
            Ok(None) => {}
            Err(e) => error!(key, error = %e, "distributed cache read failed, falling back to loader"),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_miss(TIER_DISTRIBUTED);
        }

        let json = loader.await?;

        if let Err(e) = self.set_ex(key, &json, ttl).await {
            error!(key, error = %e, "distributed cache fill failed");
        }
        Ok(json)
    }
}
