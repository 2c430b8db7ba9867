//! Bounded-parallel counterparty enrichment
//!
//! Each row names a counterparty whose display name lives elsewhere. The
//! lookups fan out over a fixed number of workers; every worker writes into
//! its own slot of a pre-sized output, and the caller reads the output only
//! after all workers have been joined. One failed lookup fails the batch.

use crate::{LedgerError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Default number of concurrent lookups
pub const DEFAULT_WORKERS: usize = 5;

/// Source of counterparty display names
#[async_trait]
pub trait CounterpartyLookup: Send + Sync {
    async fn display_name(&self, user_id: &str) -> Result<String>;
}

/// Worker pool over a [`CounterpartyLookup`]
#[derive(Clone)]
pub struct Enricher {
    lookup: Arc<dyn CounterpartyLookup>,
    workers: usize,
}

impl Enricher {
    pub fn new(lookup: Arc<dyn CounterpartyLookup>, workers: usize) -> Self {
        Self {
            lookup,
            workers: workers.max(1),
        }
    }

    /// Display names for `user_ids`, in input order
    pub async fn display_names(&self, user_ids: Vec<String>) -> Result<Vec<String>> {
        let total = user_ids.len();
        let permits = Arc::new(Semaphore::new(self.workers));
        let mut workers = JoinSet::new();

        for (index, user_id) in user_ids.into_iter().enumerate() {
            let permits = permits.clone();
            let lookup = self.lookup.clone();
            workers.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.map_err(|e| {
                    LedgerError::LookupFailed(format!("worker pool closed: {}", e))
                })?;
                let name = lookup.display_name(&user_id).await.map_err(|e| {
                    LedgerError::LookupFailed(format!("counterparty {}: {}", user_id, e))
                })?;
                Ok::<_, LedgerError>((index, name))
            });
        }

        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut first_error = None;

        while let Some(joined) = workers.join_next().await {
            let outcome = joined
                .map_err(|e| LedgerError::LookupFailed(format!("lookup worker failed: {}", e)))
                .and_then(|r| r);
            match outcome {
                Ok((index, name)) => slots[index] = Some(name),
                Err(e) => {
                    warn!(error = %e, "counterparty lookup failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!(rows = total, workers = self.workers, "counterparties resolved");
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    LedgerError::LookupFailed(format!("no result for row {}", index))
                })
            })
            .collect()
    }

    /// Pair every row with the display name of its counterparty
    pub async fn enrich<T, F>(&self, rows: Vec<T>, counterparty: F) -> Result<Vec<(T, String)>>
    where
        F: Fn(&T) -> &str,
    {
        let ids = rows.iter().map(|row| counterparty(row).to_string()).collect();
        let names = self.display_names(ids).await?;
        Ok(rows.into_iter().zip(names).collect())
    }
}
