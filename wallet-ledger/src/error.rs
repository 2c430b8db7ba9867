//! Error types for the wallet ledger

use std::time::Duration;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger errors
///
/// Every variant is `Clone` so a coalesced leader can hand the exact same
/// error to all of its followers. Foreign error types are flattened into
/// strings on conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Row absent (also used for a cached "not found" sentinel)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate unique key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Conditional deduct affected zero rows
    #[error("Insufficient funds for user {user_id}")]
    InsufficientFunds {
        /// Account that would have gone negative
        user_id: String,
    },

    /// Relational store connectivity or execution error
    #[error("Store error: {0}")]
    Store(String),

    /// Distributed cache connectivity error
    #[error("Cache error: {0}")]
    Cache(String),

    /// I/O deadline exceeded
    #[error("Operation {operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that was cut off
        operation: &'static str,
        /// Deadline that expired
        timeout: Duration,
    },

    /// Invariant violation (out-of-range amount, zero affected rows, etc.)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Counterparty lookup failed during enrichment
    #[error("Lookup failed: {0}")]
    LookupFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    /// HTTP status the boundary should report for this error
    pub fn status_code(&self) -> u16 {
        match self {
            LedgerError::NotFound(_) => 404,
            LedgerError::Conflict(_) => 409,
            LedgerError::InsufficientFunds { .. } => 400,
            LedgerError::Invariant(_) => 400,
            LedgerError::LookupFailed(_) => 401,
            LedgerError::Store(_) | LedgerError::Cache(_) | LedgerError::Timeout { .. } => 503,
            LedgerError::Serialization(_) | LedgerError::Config(_) => 500,
        }
    }

    /// Stable machine-readable error kind
    pub fn error_type(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "not_found",
            LedgerError::Conflict(_) => "duplicate_error",
            LedgerError::InsufficientFunds { .. } => "insufficient_balance",
            LedgerError::Store(_) => "database_error",
            LedgerError::Cache(_) => "cache_error",
            LedgerError::Timeout { .. } => "timeout",
            LedgerError::Invariant(_) => "validation_error",
            LedgerError::LookupFailed(_) => "unauthorized",
            LedgerError::Serialization(_) => "serialization_error",
            LedgerError::Config(_) => "config_error",
        }
    }

    /// Connectivity-class failure; safe for the caller to retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Store(_) | LedgerError::Cache(_) | LedgerError::Timeout { .. }
        )
    }
}

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => LedgerError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                LedgerError::Conflict(db.message().to_string())
            }
            other => LedgerError::Store(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for LedgerError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        LedgerError::Store(format!("migration failed: {}", err))
    }
}

impl From<redis::RedisError> for LedgerError {
    fn from(err: redis::RedisError) -> Self {
        LedgerError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for LedgerError {
    fn from(err: config::ConfigError) -> Self {
        LedgerError::Config(err.to_string())
    }
}

/// Run an I/O future under a deadline
///
/// A future cut off by the deadline is dropped, so any store-after-load it
/// was about to perform never happens.
pub async fn with_deadline<T, F>(operation: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout { operation, timeout }),
    }
}
