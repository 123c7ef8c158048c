//! Bazaar Ledger Core
//!
//! Wallet balances and the append-only transaction log of the marketplace.
//!
//! # Architecture
//!
//! - **Single Writer**: every mutation runs as an atomic unit on one actor task
//! - **Staged Units**: a [`LedgerTxn`] collects writes and commits them as one RocksDB batch
//! - **Integer Money**: amounts are cents in [`Money`], never floats
//!
//! # Invariants
//!
//! - A wallet balance is never negative
//! - Each entry's `balance_after` equals the wallet balance after its mutation
//! - Balance equals the sum of the wallet's entry amounts
//! - Entries are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod ids;
pub mod storage;
pub mod txn;
pub mod wallet;
pub mod ledger;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use actor::LedgerHandle;
pub use config::{Config, RocksDBConfig};
pub use error::{Error, Result};
pub use ledger::{AuditReport, Ledger};
pub use metrics::Metrics;
pub use storage::{index_key, Collection, Record, ScanOrder, Storage};
pub use txn::LedgerTxn;
pub use types::{
    LedgerRef, Money, Page, Paginated, Posting, TransactionStatus, TransactionType, UserId,
    Wallet, WalletTransaction,
};
