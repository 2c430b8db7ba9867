//! Two-tier cache-aside
//!
//! ```text
//! resolve(key)
//!   local.fetch ── hit ──────────────────────────────▶ value
//!     │ miss
//!     ▼
//!   distributed.fetch ── hit ── decode ── fill local ─▶ value
//!     │ miss
//!     ▼
//!   store loader ── encode ── fill distributed ── decode ── fill local ─▶ value
//! ```
//!
//! Each tier is filled with its own TTL only after the tier below produced a
//! value. Callers wrap `resolve` in a coalescer so one execution per key
//! reaches the store.

use super::{DistributedCache, LocalCache};
use crate::config::CacheTtl;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, warn};

/// Local tier stacked on the distributed tier for one payload type
pub struct TieredCache<V> {
    local: Arc<dyn LocalCache<V>>,
    distributed: Arc<dyn DistributedCache>,
    ttl: CacheTtl,
}

impl<V> Clone for TieredCache<V> {
    fn clone(&self) -> Self {
        Self {
            local: self.local.clone(),
            distributed: self.distributed.clone(),
            ttl: self.ttl,
        }
    }
}

impl<V> TieredCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Stack `local` over `distributed`
    pub fn new(
        local: Arc<dyn LocalCache<V>>,
        distributed: Arc<dyn DistributedCache>,
        ttl: CacheTtl,
    ) -> Self {
        Self {
            local,
            distributed,
            ttl,
        }
    }

    /// Read `key` through both tiers, falling back to `load`
    pub async fn resolve<'a, F>(&'a self, key: &'a str, load: F) -> Result<V>
    where
        F: Future<Output = Result<V>> + Send + 'a,
    {
        let distributed = &self.distributed;
        let ttl = self.ttl;

        self.local
            .fetch(
                key,
                ttl.local,
                Box::pin(async move {
                    let json = distributed
                        .fetch(
                            key,
                            ttl.distributed,
                            Box::pin(async move {
                                let value = load.await?;
                                Ok(serde_json::to_string(&value)?)
                            }),
                        )
                        .await?;

                    match serde_json::from_str::<V>(&json) {
                        Ok(value) => Ok(value),
                        Err(e) => {
                            // Evict the bad payload so the next read reloads it
                            warn!(key, error = %e, "undecodable distributed cache entry");
                            if let Err(del) = distributed.delete(key).await {
                                error!(key, error = %del, "failed to evict undecodable entry");
                            }
                            Err(e.into())
                        }
                    }
                }),
            )
            .await
    }

    /// Write `value` through to both tiers
    pub async fn prime(&self, key: &str, value: &V) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.distributed.set_ex(key, &json, self.ttl.distributed).await?;
        self.local.set(key, value.clone(), self.ttl.local).await;
        Ok(())
    }

    /// Delete `key` from both tiers
    ///
    /// The local entry is always dropped; a failed distributed delete is
    /// returned to the caller. Deleting an absent key succeeds.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let remote = self.distributed.delete(key).await;
        self.local.delete(key).await;
        remote.map(|_| ())
    }
}
