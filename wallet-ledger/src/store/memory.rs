//! In-memory store
//!
//! Same contract as the Postgres store, including the conditional deduct
//! and summary upsert. Used by tests and local runs without a database.
//!
//! A transaction holds the state lock for its whole lifetime and works on
//! a scratch copy; `commit` swaps the copy in, anything else discards it.

use super::{LedgerStore, LedgerTx, UserStore};
use crate::types::{Balance, History, HistorySummary, HistoryType, User};
use crate::{LedgerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::warn;

/// Step that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Begin,
    Grant,
    Deduct,
    InsertHistory,
    UpsertSummary,
    Commit,
    Read,
}

#[derive(Debug, Clone, Default)]
struct State {
    balances: HashMap<String, Decimal>,
    histories: Vec<History>,
    summaries: HashMap<String, HistorySummary>,
    users: HashMap<String, User>,
}

#[derive(Default)]
struct Inner {
    state: Arc<AsyncMutex<State>>,
    faults: Mutex<HashSet<Fault>>,
    unavailable: AtomicBool,
    read_latency: Mutex<Duration>,
    reads: AtomicU64,
    commits: AtomicU64,
}

impl Inner {
    fn check(&self, fault: Fault) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Store("connection refused".to_string()));
        }
        if self.faults.lock().contains(&fault) {
            warn!(?fault, "injected store fault");
            return Err(LedgerError::Store(format!("injected fault at {:?}", fault)));
        }
        Ok(())
    }

    async fn read(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let latency = *self.read_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check(Fault::Read)
    }
}

/// Store double with fault injection
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every future execution of `fault`
    pub fn inject(&self, fault: Fault) {
        self.inner.faults.lock().insert(fault);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
    }

    /// Make every call fail as if the database were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every read by `latency`
    pub fn set_read_latency(&self, latency: Duration) {
        *self.inner.read_latency.lock() = latency;
    }

    /// Read attempts so far, failed ones included
    pub fn reads(&self) -> u64 {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Committed transactions so far
    pub fn commits(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    /// Committed balance, bypassing fault injection
    pub async fn balance_of(&self, user_id: &str) -> Option<Decimal> {
        self.inner.state.lock().await.balances.get(user_id).copied()
    }

    /// Committed history rows, bypassing fault injection
    pub async fn history_count(&self) -> usize {
        self.inner.state.lock().await.histories.len()
    }

    /// Committed summary rows, bypassing fault injection
    pub async fn summary_count(&self) -> usize {
        self.inner.state.lock().await.summaries.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        self.inner.check(Fault::Begin)?;
        let guard = self.inner.state.clone().lock_owned().await;
        let scratch = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            scratch,
            inner: self.inner.clone(),
        }))
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>> {
        self.inner.read().await?;
        let state = self.inner.state.lock().await;
        Ok(state.balances.get(user_id).map(|amount| Balance {
            user_id: user_id.to_string(),
            amount: *amount,
        }))
    }

    async fn latest_history(&self, user_id: &str, limit: i64) -> Result<Vec<History>> {
        self.inner.read().await?;
        let state = self.inner.state.lock().await;
        // Newest insert first among equal timestamps
        let mut rows: Vec<History> = state
            .histories
            .iter()
            .rev()
            .filter(|h| h.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn history_summary(
        &self,
        user_id: &str,
        history_type: HistoryType,
        limit: i64,
    ) -> Result<Vec<HistorySummary>> {
        self.inner.read().await?;
        let state = self.inner.state.lock().await;
        let mut rows: Vec<HistorySummary> = state
            .summaries
            .values()
            .filter(|s| s.user_id == user_id && s.history_type == history_type)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.amount
                .cmp(&a.amount)
                .then_with(|| a.target_user_id.cmp(&b.target_user_id))
        });
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.inner.check(Fault::Begin)?;
        let mut state = self.inner.state.lock().await;
        if state.users.contains_key(&user.id)
            || state.users.values().any(|u| u.username == user.username)
        {
            return Err(LedgerError::Conflict(format!(
                "user {} ({}) already exists",
                user.id, user.username
            )));
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.inner.read().await?;
        Ok(self.inner.state.lock().await.users.get(id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.inner.read().await?;
        let state = self.inner.state.lock().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }
}

/// Open in-memory transaction
pub struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    scratch: State,
    inner: Arc<Inner>,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn grant_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()> {
        self.inner.check(Fault::Grant)?;
        *self
            .scratch
            .balances
            .entry(user_id.to_string())
            .or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    async fn deduct_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()> {
        self.inner.check(Fault::Deduct)?;
        match self.scratch.balances.get_mut(user_id) {
            Some(balance) if *balance - amount >= Decimal::ZERO => {
                *balance -= amount;
                Ok(())
            }
            _ => Err(LedgerError::InsufficientFunds {
                user_id: user_id.to_string(),
            }),
        }
    }

    async fn insert_history(&mut self, history: &History) -> Result<()> {
        self.inner.check(Fault::InsertHistory)?;
        if self.scratch.histories.iter().any(|h| h.id == history.id) {
            return Err(LedgerError::Conflict(format!("history {} already exists", history.id)));
        }
        self.scratch.histories.push(history.clone());
        Ok(())
    }

    async fn upsert_history_summary(&mut self, summary: &HistorySummary) -> Result<()> {
        self.inner.check(Fault::UpsertSummary)?;
        self.scratch
            .summaries
            .entry(summary.id())
            .and_modify(|row| row.amount += summary.amount)
            .or_insert_with(|| summary.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            mut guard,
            scratch,
            inner,
        } = *self;
        inner.check(Fault::Commit)?;
        *guard = scratch;
        inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
