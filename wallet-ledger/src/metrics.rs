//! Metrics collection for observability
//!
//! Prometheus counters for the cache tiers and the ledger write path.
//!
//! # Metrics
//!
//! - `wallet_cache_hits_total{tier}` - Cache hits per tier
//! - `wallet_cache_misses_total{tier}` - Cache misses per tier
//! - `wallet_store_loads_total` - Reads that reached the relational store
//! - `wallet_coalesced_followers_total` - Callers served by another caller's flight
//! - `wallet_invalidations_total` - Cache keys deleted after commit
//! - `wallet_invalidation_failures_total` - Post-commit deletes that failed

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Tier label for the process-local cache
pub const TIER_LOCAL: &str = "local";
/// Tier label for the distributed cache
pub const TIER_DISTRIBUTED: &str = "distributed";

/// Metrics collector
///
/// Counters live on a private registry so several ledgers (tests, multiple
/// tenants) can coexist in one process.
#[derive(Clone)]
pub struct Metrics {
    /// Cache hits by tier
    pub cache_hits: IntCounterVec,

    /// Cache misses by tier
    pub cache_misses: IntCounterVec,

    /// Store loads
    pub store_loads: IntCounter,

    /// Coalesced followers
    pub coalesced_followers: IntCounter,

    /// Keys invalidated
    pub invalidations: IntCounter,

    /// Failed invalidations
    pub invalidation_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let cache_hits = IntCounterVec::new(
            Opts::new("wallet_cache_hits_total", "Cache hits per tier"),
            &["tier"],
        )?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses = IntCounterVec::new(
            Opts::new("wallet_cache_misses_total", "Cache misses per tier"),
            &["tier"],
        )?;
        registry.register(Box::new(cache_misses.clone()))?;

        let store_loads = IntCounter::new(
            "wallet_store_loads_total",
            "Reads that reached the relational store",
        )?;
        registry.register(Box::new(store_loads.clone()))?;

        let coalesced_followers = IntCounter::new(
            "wallet_coalesced_followers_total",
            "Callers served by another caller's in-flight execution",
        )?;
        registry.register(Box::new(coalesced_followers.clone()))?;

        let invalidations = IntCounter::new(
            "wallet_invalidations_total",
            "Cache keys deleted after commit",
        )?;
        registry.register(Box::new(invalidations.clone()))?;

        let invalidation_failures = IntCounter::new(
            "wallet_invalidation_failures_total",
            "Post-commit cache deletes that failed",
        )?;
        registry.register(Box::new(invalidation_failures.clone()))?;

        Ok(Self {
            cache_hits,
            cache_misses,
            store_loads,
            coalesced_followers,
            invalidations,
            invalidation_failures,
            registry,
        })
    }

    /// Record a cache hit
    pub fn record_hit(&self, tier: &str) {
        self.cache_hits.with_label_values(&[tier]).inc();
    }

    /// Record a cache miss
    pub fn record_miss(&self, tier: &str) {
        self.cache_misses.with_label_values(&[tier]).inc();
    }

    /// Record a store load
    pub fn record_store_load(&self) {
        self.store_loads.inc();
    }

    /// Record a coalesced follower
    pub fn record_coalesced(&self) {
        self.coalesced_followers.inc();
    }

    /// Record a post-commit delete
    pub fn record_invalidation(&self, ok: bool) {
        if ok {
            self.invalidations.inc();
        } else {
            self.invalidation_failures.inc();
        }
    }

    /// Hit rate for a tier, as a percentage
    pub fn hit_rate(&self, tier: &str) -> f64 {
        let hits = self.cache_hits.with_label_values(&[tier]).get();
        let misses = self.cache_misses.with_label_values(&[tier]).get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64) / (total as f64) * 100.0
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric definitions are static and valid")
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("store_loads", &self.store_loads.get())
            .field("coalesced_followers", &self.coalesced_followers.get())
            .field("invalidations", &self.invalidations.get())
            .finish()
    }
}
