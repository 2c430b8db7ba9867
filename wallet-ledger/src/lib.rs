//! Wallet Ledger
//!
//! Balance ledger with double-entry history, served through a two-tier
//! cache (process-local moka + shared Redis) and request coalescing.
//!
//! # Architecture
//!
//! - **Source of truth**: Postgres; every mutation is one transaction
//! - **Cache-aside reads**: local tier, then distributed tier, then store
//! - **Coalescing**: at most one in-flight load per key
//! - **Post-commit invalidation**: writes delete exactly the keys they affect
//!
//! # Invariants
//!
//! - A balance is never negative after a committed mutation
//! - Every history leg is paired with its summary upsert
//! - A disbursement moves money all-or-nothing

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod cache;
pub mod coalesce;
pub mod config;
pub mod directory;
pub mod enrichment;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod metrics;
pub mod service;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use directory::Directory;
pub use error::{LedgerError, Result};
pub use ledger::Ledger;
pub use service::WalletService;
pub use types::{Balance, DisbursementRequest, History, HistorySummary, HistoryType, User};
