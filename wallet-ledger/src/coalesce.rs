//! Request coalescing ("singleflight")
//!
//! At most one execution per key is in flight. Callers that arrive while a
//! key is in flight wait for the leader and receive a clone of its result,
//! error included; their own futures are dropped unpolled. Nothing is
//! remembered once the flight lands, so a failed key is retried by the next
//! caller.
//!
//! If the leader is cancelled mid-flight, one of the waiting callers picks
//! the key up and runs its own future instead.

use crate::metrics::Metrics;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::trace;

/// Capability to deduplicate concurrent work by key
#[async_trait]
pub trait Coalesce<T: Send + 'static>: Send + Sync {
    /// Run `fut` unless another caller is already running `key`
    async fn once<'a>(&'a self, key: &'a str, fut: BoxFuture<'a, Result<T>>) -> Result<T>;
}

type Flight<T> = Arc<OnceCell<Result<T>>>;

/// Key-deduplicating coalescer
pub struct Coalescer<T> {
    flights: DashMap<String, Flight<T>>,
    metrics: Option<Metrics>,
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self {
            flights: DashMap::new(),
            metrics: None,
        }
    }

    /// Count followers on the given collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Keys currently in flight
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `fut` as leader of `key`, or wait for the current leader
    pub async fn run<F>(&self, key: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let flight: Flight<T> = Arc::clone(
            self.flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        let mut led = false;
        let result = flight
            .get_or_init(|| {
                led = true;
                fut
            })
            .await
            .clone();

        if !led {
            trace!(key, "coalesced onto in-flight execution");
            if let Some(metrics) = &self.metrics {
                metrics.record_coalesced();
            }
        }

        // Only drop our own flight; a newer one may already own the key
        self.flights.remove_if(key, |_, current| Arc::ptr_eq(current, &flight));

        result
    }
}

impl<T> Default for Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Coalesce<T> for Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn once<'a>(&'a self, key: &'a str, fut: BoxFuture<'a, Result<T>>) -> Result<T> {
        self.run(key, fut).await
    }
}

/// Coalescer that never deduplicates; every caller runs its own future
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

#[async_trait]
impl<T: Send + 'static> Coalesce<T> for Passthrough {
    async fn once<'a>(&'a self, _key: &'a str, fut: BoxFuture<'a, Result<T>>) -> Result<T> {
        fut.await
    }
}
