//! Ledger domain
//!
//! Reads go through the coalescer and then the two cache tiers before they
//! reach the store. Mutations run in one store transaction; once it commits,
//! every cache key derived from a changed row is deleted, distributed tier
//! first. A failed invalidation fails the call even though the money moved.
//!
//! A mutation runs on its own task, so dropping the caller after the
//! transaction started never skips the commit's invalidation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_decimal::Decimal;
//! use wallet_ledger::cache::InMemoryDistributedCache;
//! use wallet_ledger::ledger::{LedgerCaches, LedgerFlights};
//! use wallet_ledger::metrics::Metrics;
//! use wallet_ledger::store::MemoryStore;
//! use wallet_ledger::{Config, Ledger};
//!
//! # async fn run() -> wallet_ledger::Result<()> {
//! let config = Config::default();
//! let metrics = Metrics::default();
//! let ledger = Ledger::new(
//!     Arc::new(MemoryStore::new()),
//!     LedgerCaches::moka(Arc::new(InMemoryDistributedCache::new()), &config.cache, &metrics),
//!     LedgerFlights::coalescing(&metrics),
//!     config.ledger.history_limit,
//!     metrics,
//! );
//!
//! ledger.grant_balance("user-1", Decimal::from(100)).await?;
//! let balance = ledger.get_balance("user-1").await?;
//! assert_eq!(balance.amount, Decimal::from(100));
//! # Ok(())
//! # }
//! ```

use crate::cache::{DistributedCache, LocalCache, MokaLocalCache, TieredCache};
use crate::coalesce::{Coalesce, Coalescer, Passthrough};
use crate::config::CacheConfig;
use crate::keys;
use crate::metrics::Metrics;
use crate::store::{LedgerStore, LedgerTx};
use crate::types::{Balance, DisbursementRequest, History, HistorySummary, HistoryType};
use crate::{LedgerError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One step of a ledger transaction
#[derive(Debug, Clone)]
enum Write {
    Grant { user_id: String, amount: Decimal },
    Deduct { user_id: String, amount: Decimal },
    /// History leg plus its summary upsert
    Record(History),
}

/// Cache entry made stale by a committed write
#[derive(Debug, Clone, PartialEq, Eq)]
enum StaleKey {
    Balance(String),
    LatestHistory(String),
    Summary(String, HistoryType),
}

fn stale_keys(writes: &[Write]) -> Vec<StaleKey> {
    fn push(stale: &mut Vec<StaleKey>, key: StaleKey) {
        if !stale.contains(&key) {
            stale.push(key);
        }
    }

    let mut stale = Vec::new();
    for write in writes {
        match write {
            Write::Grant { user_id, .. } | Write::Deduct { user_id, .. } => {
                push(&mut stale, StaleKey::Balance(user_id.clone()));
            }
            Write::Record(leg) => {
                push(&mut stale, StaleKey::LatestHistory(leg.user_id.clone()));
                push(&mut stale, StaleKey::Summary(leg.user_id.clone(), leg.history_type));
            }
        }
    }
    stale
}

async fn apply(tx: &mut dyn LedgerTx, writes: &[Write]) -> Result<()> {
    for write in writes {
        match write {
            Write::Grant { user_id, amount } => tx.grant_balance(user_id, *amount).await?,
            Write::Deduct { user_id, amount } => tx.deduct_balance(user_id, *amount).await?,
            Write::Record(leg) => {
                tx.insert_history(leg).await?;
                tx.upsert_history_summary(&leg.summary()).await?;
            }
        }
    }
    Ok(())
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(LedgerError::Invariant("user id must not be empty".to_string()));
    }
    Ok(())
}

/// Decimal places the store keeps for an amount
pub const AMOUNT_SCALE: u32 = 2;

fn require_scale(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(LedgerError::Invariant(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    Ok(())
}

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Invariant(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

/// Tiered caches for the three read models
#[derive(Clone)]
pub struct LedgerCaches {
    pub balances: TieredCache<Option<Balance>>,
    pub histories: TieredCache<Vec<History>>,
    pub summaries: TieredCache<Vec<HistorySummary>>,
}

impl LedgerCaches {
    /// moka local tiers stacked on one shared distributed tier
    pub fn moka(
        distributed: Arc<dyn DistributedCache>,
        config: &CacheConfig,
        metrics: &Metrics,
    ) -> Self {
        let ttl = config.ttl();
        let capacity = config.local_capacity;

        Self {
            balances: TieredCache::new(local_cache(capacity, metrics), distributed.clone(), ttl),
            histories: TieredCache::new(local_cache(capacity, metrics), distributed.clone(), ttl),
            summaries: TieredCache::new(local_cache(capacity, metrics), distributed, ttl),
        }
    }

    /// Delete stale entries; every key is attempted, the first error wins
    async fn invalidate(&self, stale: &[StaleKey], metrics: &Metrics) -> Result<()> {
        let mut first_error = None;

        for entry in stale {
            let result = match entry {
                StaleKey::Balance(user_id) => {
                    self.balances.invalidate(&keys::balance(user_id)).await
                }
                StaleKey::LatestHistory(user_id) => {
                    self.histories
                        .invalidate(&keys::latest_history(user_id))
                        .await
                }
                StaleKey::Summary(user_id, history_type) => {
                    self.summaries
                        .invalidate(&keys::history_summary(user_id, *history_type))
                        .await
                }
            };

            metrics.record_invalidation(result.is_ok());
            if let Err(e) = result {
                error!(key = ?entry, error = %e, "cache invalidation failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Coalescers for the three read models
#[derive(Clone)]
pub struct LedgerFlights {
    pub balances: Arc<dyn Coalesce<Option<Balance>>>,
    pub histories: Arc<dyn Coalesce<Vec<History>>>,
    pub summaries: Arc<dyn Coalesce<Vec<HistorySummary>>>,
}

impl LedgerFlights {
    /// One in-flight load per key
    pub fn coalescing(metrics: &Metrics) -> Self {
        Self {
            balances: Arc::new(Coalescer::<Option<Balance>>::new().with_metrics(metrics.clone())),
            histories: Arc::new(Coalescer::<Vec<History>>::new().with_metrics(metrics.clone())),
            summaries: Arc::new(
                Coalescer::<Vec<HistorySummary>>::new().with_metrics(metrics.clone()),
            ),
        }
    }

    /// Every concurrent read reaches the caches and store on its own
    pub fn passthrough() -> Self {
        Self {
            balances: Arc::new(Passthrough),
            histories: Arc::new(Passthrough),
            summaries: Arc::new(Passthrough),
        }
    }
}

/// Balance, history and summary operations
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    caches: LedgerCaches,
    flights: LedgerFlights,
    history_limit: i64,
    metrics: Metrics,
}

impl Ledger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        caches: LedgerCaches,
        flights: LedgerFlights,
        history_limit: i64,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            caches,
            flights,
            history_limit,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current balance; `NotFound` if the user never received funds
    pub async fn get_balance(&self, user_id: &str) -> Result<Balance> {
        let key = keys::balance(user_id);
        let flight = keys::flight(&key);

        let balance = self
            .flights
            .balances
            .once(
                &flight,
                Box::pin(self.caches.balances.resolve(&key, async {
                    self.metrics.record_store_load();
                    self.store.get_balance(user_id).await
                })),
            )
            .await?;

        balance.ok_or_else(|| LedgerError::NotFound(format!("balance of user {}", user_id)))
    }

    /// Newest history legs, DEBIT amounts rendered negative
    pub async fn latest_history(&self, user_id: &str) -> Result<Vec<History>> {
        let key = keys::latest_history(user_id);
        let flight = keys::flight(&key);
        let limit = self.history_limit;

        let mut rows = self
            .flights
            .histories
            .once(
                &flight,
                Box::pin(self.caches.histories.resolve(&key, async {
                    self.metrics.record_store_load();
                    self.store.latest_history(user_id, limit).await
                })),
            )
            .await?;

        // Cached rows keep the stored magnitude
        rows.iter_mut().for_each(History::normalize_amount);
        Ok(rows)
    }

    /// Largest running totals of one direction
    pub async fn history_summary_by_type(
        &self,
        user_id: &str,
        history_type: HistoryType,
    ) -> Result<Vec<HistorySummary>> {
        let key = keys::history_summary(user_id, history_type);
        let flight = keys::flight(&key);
        let limit = self.history_limit;

        self.flights
            .summaries
            .once(
                &flight,
                Box::pin(self.caches.summaries.resolve(&key, async {
                    self.metrics.record_store_load();
                    self.store.history_summary(user_id, history_type, limit).await
                })),
            )
            .await
    }

    /// Credit `amount` as a top-up
    pub async fn grant_balance(&self, user_id: &str, amount: Decimal) -> Result<()> {
        require_user(user_id)?;
        require_scale(amount)?;
        if amount < Decimal::ZERO {
            return Err(LedgerError::Invariant(format!(
                "grant amount must not be negative, got {}",
                amount
            )));
        }

        let writes = vec![
            Write::Grant {
                user_id: user_id.to_string(),
                amount,
            },
            Write::Record(History::new(
                user_id,
                user_id,
                amount,
                HistoryType::Credit,
                "Top-up money",
            )),
        ];
        self.commit("grant_balance", writes).await?;

        info!(user_id, %amount, "balance granted");
        Ok(())
    }

    /// Debit `amount` as a withdrawal; the balance never goes negative
    pub async fn deduct_balance(&self, user_id: &str, amount: Decimal) -> Result<()> {
        require_user(user_id)?;
        require_positive(amount)?;
        require_scale(amount)?;

        let writes = vec![
            Write::Deduct {
                user_id: user_id.to_string(),
                amount,
            },
            Write::Record(History::new(
                user_id,
                user_id,
                amount,
                HistoryType::Debit,
                "Withdraw money",
            )),
        ];
        self.commit("deduct_balance", writes).await?;

        info!(user_id, %amount, "balance deducted");
        Ok(())
    }

    /// Move money between two accounts, all or nothing
    pub async fn disburse(&self, request: &DisbursementRequest) -> Result<()> {
        let DisbursementRequest {
            from_user_id: from,
            to_user_id: to,
            amount,
        } = request;
        require_user(from)?;
        require_user(to)?;
        require_positive(*amount)?;
        require_scale(*amount)?;

        let writes = vec![
            Write::Grant {
                user_id: to.clone(),
                amount: *amount,
            },
            Write::Deduct {
                user_id: from.clone(),
                amount: *amount,
            },
            Write::Record(History::new(
                to.as_str(),
                from.as_str(),
                *amount,
                HistoryType::Credit,
                format!("Receive money from {}", from),
            )),
            Write::Record(History::new(
                from.as_str(),
                to.as_str(),
                *amount,
                HistoryType::Debit,
                format!("Transfer money to {}", to),
            )),
        ];
        self.commit("disburse", writes).await?;

        info!(from = %from, to = %to, amount = %amount, "disbursement committed");
        Ok(())
    }

    /// Drop every cached view of one user
    ///
    /// Idempotent; used to repair the caches after a failed invalidation.
    pub async fn invalidate_user(&self, user_id: &str) -> Result<()> {
        self.caches
            .invalidate(
                &[
                    StaleKey::Balance(user_id.to_string()),
                    StaleKey::LatestHistory(user_id.to_string()),
                    StaleKey::Summary(user_id.to_string(), HistoryType::Credit),
                    StaleKey::Summary(user_id.to_string(), HistoryType::Debit),
                ],
                &self.metrics,
            )
            .await
    }

    async fn commit(&self, operation: &'static str, writes: Vec<Write>) -> Result<()> {
        let store = self.store.clone();
        let caches = self.caches.clone();
        let metrics = self.metrics.clone();

        // Detached from the caller: a dropped caller cannot skip invalidation
        let task = tokio::spawn(async move {
            let mut tx = store.begin().await?;

            if let Err(e) = apply(tx.as_mut(), &writes).await {
                warn!(operation, error = %e, "rolling back");
                if let Err(rollback) = tx.rollback().await {
                    error!(operation, error = %rollback, "rollback failed");
                }
                return Err(e);
            }
            tx.commit().await?;
            debug!(operation, "transaction committed");

            caches.invalidate(&stale_keys(&writes), &metrics).await
        });

        task.await
            .map_err(|e| LedgerError::Store(format!("{} task failed: {}", operation, e)))?
    }
}

fn local_cache<V>(capacity: u64, metrics: &Metrics) -> Arc<dyn LocalCache<V>>
where
    V: Clone + Send + Sync + 'static,
{
    Arc::new(MokaLocalCache::with_capacity(capacity).with_metrics(metrics.clone()))
}
