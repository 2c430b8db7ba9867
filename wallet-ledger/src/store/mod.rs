//! Relational store access
//!
//! The store is the only source of truth. Writes happen inside an explicit
//! [`LedgerTx`]; an exec that touches zero rows is reported as an error,
//! never swallowed.

pub mod memory;
pub mod postgres;
pub mod queries;

use crate::types::{Balance, History, HistorySummary, HistoryType, User};
use crate::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use memory::{Fault, MemoryStore};
pub use postgres::PgStore;

/// Ledger reads and transaction entry point
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn LedgerTx>>;

    /// Balance row, `None` when the user never received funds
    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>>;

    /// Newest `limit` history rows, creation time descending
    async fn latest_history(&self, user_id: &str, limit: i64) -> Result<Vec<History>>;

    /// Largest `limit` summaries of one direction, amount descending
    async fn history_summary(
        &self,
        user_id: &str,
        history_type: HistoryType,
        limit: i64,
    ) -> Result<Vec<HistorySummary>>;
}

/// Open write transaction
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Add `amount` to the balance, creating the row if absent
    async fn grant_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()>;

    /// Subtract `amount` only if the balance stays non-negative
    ///
    /// Fails with `InsufficientFunds` when no row qualifies.
    async fn deduct_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()>;

    /// Append one history leg
    async fn insert_history(&mut self, history: &History) -> Result<()>;

    /// Add `summary.amount` to the running total, creating the row if absent
    async fn upsert_history_summary(&mut self, summary: &HistorySummary) -> Result<()>;

    /// Make every write visible
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// User directory persistence
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Register a user; a taken id or username is a `Conflict`
    async fn insert_user(&self, user: &User) -> Result<()>;

    /// User by id
    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>>;

    /// User by username
    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
}
