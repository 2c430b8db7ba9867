//! Postgres store

use super::queries;
use super::{LedgerStore, LedgerTx, UserStore};
use crate::config::DatabaseConfig;
use crate::error::with_deadline;
use crate::types::{Balance, History, HistorySummary, HistoryType, User};
use crate::{LedgerError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgQueryResult};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info};

/// Pool-backed ledger and user store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    io_timeout: Duration,
}

impl PgStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool, io_timeout: Duration) -> Self {
        PgStore { pool, io_timeout }
    }

    /// Open a pool sized by `config`
    pub async fn connect(config: &DatabaseConfig, io_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to Postgres");
        Ok(Self::new(pool, io_timeout))
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>> {
        let tx = with_deadline("store.begin", self.io_timeout, async {
            Ok(self.pool.begin().await?)
        })
        .await?;
        Ok(Box::new(PgTx {
            tx,
            io_timeout: self.io_timeout,
        }))
    }

    async fn get_balance(&self, user_id: &str) -> Result<Option<Balance>> {
        with_deadline("store.get_balance", self.io_timeout, async {
            let balance = sqlx::query_as::<_, Balance>(queries::GET_BALANCE_BY_USER_ID)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(balance)
        })
        .await
    }

    async fn latest_history(&self, user_id: &str, limit: i64) -> Result<Vec<History>> {
        with_deadline("store.latest_history", self.io_timeout, async {
            let rows = sqlx::query_as::<_, History>(queries::GET_LATEST_HISTORY_BY_USER_ID)
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        })
        .await
    }

    async fn history_summary(
        &self,
        user_id: &str,
        history_type: HistoryType,
        limit: i64,
    ) -> Result<Vec<HistorySummary>> {
        with_deadline("store.history_summary", self.io_timeout, async {
            let rows =
                sqlx::query_as::<_, HistorySummary>(queries::GET_HISTORY_SUMMARY_BY_USER_ID_AND_TYPE)
                    .bind(user_id)
                    .bind(history_type)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        })
        .await
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let result = with_deadline("store.insert_user", self.io_timeout, async {
            Ok(sqlx::query(queries::INSERT_USER)
                .bind(&user.id)
                .bind(&user.username)
                .execute(&self.pool)
                .await?)
        })
        .await?;
        expect_rows(result, || {
            LedgerError::Invariant(format!("insert of user {} affected no rows", user.id))
        })
    }

    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        with_deadline("store.get_user_by_id", self.io_timeout, async {
            let user = sqlx::query_as::<_, User>(queries::GET_USER_BY_ID)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(user)
        })
        .await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        with_deadline("store.get_user_by_username", self.io_timeout, async {
            let user = sqlx::query_as::<_, User>(queries::GET_USER_BY_USERNAME)
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
            Ok(user)
        })
        .await
    }
}

/// Open Postgres transaction
///
/// sqlx rolls the transaction back when it is dropped uncommitted.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    io_timeout: Duration,
}

#[async_trait]
impl LedgerTx for PgTx {
    async fn grant_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()> {
        let tx = &mut self.tx;
        let result = with_deadline("store.grant_balance", self.io_timeout, async move {
            Ok(sqlx::query(queries::GRANT_BALANCE_BY_USER_ID)
                .bind(user_id)
                .bind(amount)
                .execute(&mut **tx)
                .await?)
        })
        .await?;
        expect_rows(result, || {
            LedgerError::Invariant(format!("grant to {} affected no rows", user_id))
        })
    }

    async fn deduct_balance(&mut self, user_id: &str, amount: Decimal) -> Result<()> {
        let tx = &mut self.tx;
        let result = with_deadline("store.deduct_balance", self.io_timeout, async move {
            Ok(sqlx::query(queries::DEDUCT_BALANCE_BY_USER_ID)
                .bind(amount)
                .bind(user_id)
                .execute(&mut **tx)
                .await?)
        })
        .await?;
        expect_rows(result, || LedgerError::InsufficientFunds {
            user_id: user_id.to_string(),
        })
    }

    async fn insert_history(&mut self, history: &History) -> Result<()> {
        let tx = &mut self.tx;
        let result = with_deadline("store.insert_history", self.io_timeout, async move {
            Ok(sqlx::query(queries::INSERT_HISTORY)
                .bind(&history.id)
                .bind(&history.user_id)
                .bind(&history.target_user_id)
                .bind(history.amount)
                .bind(history.history_type)
                .bind(&history.notes)
                .bind(history.created_at)
                .execute(&mut **tx)
                .await?)
        })
        .await?;
        expect_rows(result, || {
            LedgerError::Invariant(format!("insert of history {} affected no rows", history.id))
        })
    }

    async fn upsert_history_summary(&mut self, summary: &HistorySummary) -> Result<()> {
        let tx = &mut self.tx;
        let id = summary.id();
        let result = with_deadline("store.upsert_history_summary", self.io_timeout, async {
            Ok(sqlx::query(queries::UPSERT_HISTORY_SUMMARY)
                .bind(&id)
                .bind(&summary.user_id)
                .bind(&summary.target_user_id)
                .bind(summary.amount)
                .bind(summary.history_type)
                .execute(&mut **tx)
                .await?)
        })
        .await?;
        expect_rows(result, || {
            LedgerError::Invariant(format!("upsert of summary {} affected no rows", id))
        })
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let io_timeout = self.io_timeout;
        with_deadline("store.commit", io_timeout, async move {
            self.tx.commit().await?;
            Ok(())
        })
        .await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let io_timeout = self.io_timeout;
        with_deadline("store.rollback", io_timeout, async move {
            self.tx.rollback().await?;
            Ok(())
        })
        .await
    }
}

fn expect_rows(result: PgQueryResult, err: impl FnOnce() -> LedgerError) -> Result<()> {
    if result.rows_affected() == 0 {
        Err(err())
    } else {
        Ok(())
    }
}
