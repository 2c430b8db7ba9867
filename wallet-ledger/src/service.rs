//! Wallet use cases
//!
//! Thin layer over the ledger and directory: input validation, recipient
//! resolution and counterparty enrichment. Response types serialize amounts
//! as JSON floats.

use crate::coalesce::{Coalesce, Coalescer, Passthrough};
use crate::directory::Directory;
use crate::enrichment::Enricher;
use crate::keys;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::types::{DisbursementRequest, HistoryType};
use crate::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Current balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

/// Top-up request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopupRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Transfer request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub to_username: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// One of the user's recent transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTransaction {
    pub username: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

/// Counterparty the user sent the most money to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopTransactingUser {
    pub username: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub transacted_value: Decimal,
}

/// Coalescers for the enriched reports
#[derive(Clone)]
pub struct ServiceFlights {
    pub top_transactions: Arc<dyn Coalesce<Vec<TopTransaction>>>,
    pub top_users: Arc<dyn Coalesce<Vec<TopTransactingUser>>>,
}

impl ServiceFlights {
    pub fn coalescing(metrics: &Metrics) -> Self {
        Self {
            top_transactions: Arc::new(
                Coalescer::<Vec<TopTransaction>>::new().with_metrics(metrics.clone()),
            ),
            top_users: Arc::new(
                Coalescer::<Vec<TopTransactingUser>>::new().with_metrics(metrics.clone()),
            ),
        }
    }

    pub fn passthrough() -> Self {
        Self {
            top_transactions: Arc::new(Passthrough),
            top_users: Arc::new(Passthrough),
        }
    }
}

pub struct WalletService {
    ledger: Arc<Ledger>,
    directory: Arc<Directory>,
    enricher: Enricher,
    flights: ServiceFlights,
    max_topup_amount: Decimal,
}

impl WalletService {
    pub fn new(
        ledger: Arc<Ledger>,
        directory: Arc<Directory>,
        enricher: Enricher,
        flights: ServiceFlights,
        max_topup_amount: Decimal,
    ) -> Self {
        Self {
            ledger,
            directory,
            enricher,
            flights,
            max_topup_amount,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Balance of `user_id`; a user without a balance row reads as zero
    pub async fn read_balance(&self, user_id: &str) -> Result<BalanceView> {
        match self.ledger.get_balance(user_id).await {
            Ok(balance) => Ok(BalanceView {
                balance: balance.amount,
            }),
            Err(LedgerError::NotFound(_)) => Ok(BalanceView {
                balance: Decimal::ZERO,
            }),
            Err(e) => {
                error!(user_id, error = %e, "read balance failed");
                Err(e)
            }
        }
    }

    pub async fn topup(&self, user_id: &str, request: &TopupRequest) -> Result<()> {
        if request.amount < Decimal::ZERO || request.amount > self.max_topup_amount {
            return Err(LedgerError::Invariant(format!(
                "top-up amount must be between 0 and {}, got {}",
                self.max_topup_amount, request.amount
            )));
        }

        self.ledger
            .grant_balance(user_id, request.amount)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "top-up failed");
                e
            })
    }

    /// Send money to another user by username
    pub async fn transfer(&self, user_id: &str, request: &TransferRequest) -> Result<()> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::Invariant(format!(
                "transfer amount must be positive, got {}",
                request.amount
            )));
        }

        // A user without a balance row has nothing to send
        let balance = self.ledger.get_balance(user_id).await?;
        if balance.amount < request.amount {
            return Err(LedgerError::InsufficientFunds {
                user_id: user_id.to_string(),
            });
        }

        let recipient = self.directory.get_user_by_username(&request.to_username).await?;
        if recipient.id == user_id {
            return Err(LedgerError::Invariant("cannot transfer to yourself".to_string()));
        }

        self.ledger
            .disburse(&DisbursementRequest {
                from_user_id: user_id.to_string(),
                to_user_id: recipient.id.clone(),
                amount: request.amount,
            })
            .await?;

        info!(user_id, to = %recipient.id, amount = %request.amount, "transfer completed");
        Ok(())
    }

    /// Recent transactions, largest rendered amount first
    pub async fn top_transactions_for_user(&self, user_id: &str) -> Result<Vec<TopTransaction>> {
        let flight = keys::top_transactions(user_id);

        self.flights
            .top_transactions
            .once(
                &flight,
                Box::pin(async {
                let mut histories = self.ledger.latest_history(user_id).await?;
                histories.sort_by(|a, b| b.amount.cmp(&a.amount));

                let enriched = self
                    .enricher
                    .enrich(histories, |history| history.target_user_id.as_str())
                    .await?;

                Ok(enriched
                    .into_iter()
                    .map(|(history, username)| TopTransaction {
                        username,
                        amount: history.amount,
                    })
                    .collect())
                }),
            )
            .await
    }

    /// Counterparties ranked by total money sent to them
    pub async fn top_transacting_users(&self, user_id: &str) -> Result<Vec<TopTransactingUser>> {
        let flight = keys::top_users(user_id);

        self.flights
            .top_users
            .once(
                &flight,
                Box::pin(async {
                let summaries = self
                    .ledger
                    .history_summary_by_type(user_id, HistoryType::Debit)
                    .await?;

                let enriched = self
                    .enricher
                    .enrich(summaries, |summary| summary.target_user_id.as_str())
                    .await?;

                Ok(enriched
                    .into_iter()
                    .map(|(summary, username)| TopTransactingUser {
                        username,
                        transacted_value: summary.amount,
                    })
                    .collect())
                }),
            )
            .await
    }
}
