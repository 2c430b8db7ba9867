//! Core types for the wallet ledger
//!
//! All amounts are stored as non-negative magnitudes. The sign of a DEBIT
//! leg is applied only when it is rendered (see [`History::normalize_amount`]).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Direction of a history leg, as seen from `user_id`
///
/// Serialized as the small integer used on the wire (1 = CREDIT, 2 = DEBIT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum HistoryType {
    /// Money flowed into the account
    Credit = 1,
    /// Money flowed out of the account
    Debit = 2,
}

impl HistoryType {
    /// Wire value
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for HistoryType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(HistoryType::Credit),
            2 => Ok(HistoryType::Debit),
            other => Err(format!("unknown history type {}", other)),
        }
    }
}

impl From<HistoryType> for i32 {
    fn from(value: HistoryType) -> Self {
        value.as_i32()
    }
}

impl fmt::Display for HistoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Balance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Balance {
    pub user_id: String,
    pub amount: Decimal,
}

/// One leg of a balance-affecting transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct History {
    pub id: String,
    pub user_id: String,
    pub target_user_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub history_type: HistoryType,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl History {
    /// New leg with a fresh id, stamped now
    pub fn new(
        user_id: impl Into<String>,
        target_user_id: impl Into<String>,
        amount: Decimal,
        history_type: HistoryType,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            user_id: user_id.into(),
            target_user_id: target_user_id.into(),
            amount,
            history_type,
            notes: notes.into(),
            created_at: Utc::now(),
        }
    }

    /// Apply the read-time sign: DEBIT legs render negative
    ///
    /// Idempotent; an already negative amount is left alone.
    pub fn normalize_amount(&mut self) {
        if self.history_type == HistoryType::Debit && self.amount > Decimal::ZERO {
            self.amount = -self.amount;
        }
    }

    /// Summary delta this leg contributes
    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            user_id: self.user_id.clone(),
            target_user_id: self.target_user_id.clone(),
            amount: self.amount,
            history_type: self.history_type,
        }
    }
}

/// Running total per (user, counterparty, direction)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HistorySummary {
    pub user_id: String,
    pub target_user_id: String,
    pub amount: Decimal,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub history_type: HistoryType,
}

impl HistorySummary {
    /// Row id; one row per (user, counterparty, direction)
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.user_id, self.target_user_id, self.history_type)
    }
}

/// Registered wallet user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
}

/// Money movement between two accounts
#[derive(Debug, Clone, PartialEq)]
pub struct DisbursementRequest {
    pub from_user_id: String,
    pub to_user_id: String,
    pub amount: Decimal,
}
