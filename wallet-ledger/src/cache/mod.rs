//! Cache tiers
//!
//! - [`local`]: per-process typed cache (moka), short TTL
//! - [`redis`]: shared JSON cache, longer TTL
//! - [`memory`]: in-process stand-in for the shared tier, with fault injection
//! - [`tiered`]: the local → distributed → store read path and two-tier invalidation

pub mod local;
pub mod memory;
pub mod redis;
pub mod tiered;

use crate::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::time::Duration;

pub use local::MokaLocalCache;
pub use memory::InMemoryDistributedCache;
pub use self::redis::RedisCache;
pub use tiered::TieredCache;

/// Process-local cache over typed values
///
/// Implementations are internally synchronized; callers never lock.
#[async_trait]
pub trait LocalCache<V: Send + 'static>: Send + Sync {
    /// Live entry for `key`
    async fn get(&self, key: &str) -> Option<V>;

    /// Store `value` for `ttl`
    async fn set(&self, key: &str, value: V, ttl: Duration);

    /// Remove `key`; returns whether an entry was present
    async fn delete(&self, key: &str) -> bool;

    /// Read-through: return the live entry or run `loader` and store its value
    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<V>>,
    ) -> Result<V>;
}

/// Cache shared by every process instance, holding JSON strings
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Payload for `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` for `ttl`
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove `key`; returns the number of entries removed (0 when absent)
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Read-through over JSON payloads
    ///
    /// A failed read is treated as a miss, a failed fill is logged; only a
    /// loader error is returned.
    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<String>>,
    ) -> Result<String>;
}
