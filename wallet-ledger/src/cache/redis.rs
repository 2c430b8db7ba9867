//! Redis-backed distributed cache

use super::DistributedCache;
use crate::error::with_deadline;
use crate::metrics::{Metrics, TIER_DISTRIBUTED};
use crate::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, error, info};

/// Shared cache over a multiplexed Redis connection
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
    io_timeout: Duration,
    metrics: Option<Metrics>,
}

impl RedisCache {
    /// Wrap an established connection
    pub fn new(redis: ConnectionManager, io_timeout: Duration) -> Self {
        RedisCache {
            redis,
            io_timeout,
            metrics: None,
        }
    }

    /// Open a connection manager for `url`
    pub async fn connect(url: &str, io_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let redis = with_deadline("redis.connect", io_timeout, async {
            Ok(ConnectionManager::new(client).await?)
        })
        .await?;
        info!("Connected to Redis");
        Ok(Self::new(redis, io_timeout))
    }

    /// Record hits and misses on the given collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, hit: bool) {
        if let Some(metrics) = &self.metrics {
            if hit {
                metrics.record_hit(TIER_DISTRIBUTED);
            } else {
                metrics.record_miss(TIER_DISTRIBUTED);
            }
        }
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.redis.clone();
        with_deadline("redis.get", self.io_timeout, async move {
            Ok(conn.get::<_, Option<String>>(key).await?)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.redis.clone();
        // SETEX rejects a zero expiry
        let seconds = ttl.as_secs().max(1);
        with_deadline("redis.set_ex", self.io_timeout, async move {
            let _: () = conn.set_ex(key, value, seconds).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.redis.clone();
        with_deadline("redis.del", self.io_timeout, async move {
            let removed: u64 = conn.del(key).await?;
            Ok(removed)
        })
        .await
    }

    async fn fetch<'a>(
        &'a self,
        key: &'a str,
        ttl: Duration,
        loader: BoxFuture<'a, Result<String>>,
    ) -> Result<String> {
        match self.get(key).await {
            Ok(Some(json)) => {
                self.record(true);
                debug!(key, "distributed cache hit");
                return Ok(json);
            }
            Ok(None) => self.record(false),
            Err(e) => {
                self.record(false);
                error!(key, error = %e, "Redis error reading cache, falling back to loader");
            }
        }

        let json = loader.await?;

        if let Err(e) = self.set_ex(key, &json, ttl).await {
            error!(key, error = %e, "Redis error filling cache");
        }
        Ok(json)
    }
}
