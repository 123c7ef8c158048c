//! Main ledger orchestration layer
//!
//! This module ties together storage, the writer actor and metrics into a
//! high-level API for wallet balances and the transaction log.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Config, Ledger, Money, Posting, TransactionType, UserId};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let wallet = ledger
//!         .credit(
//!             UserId(1),
//!             Money::from_dollars(100),
//!             Posting::new(TransactionType::Deposit, "Initial funding"),
//!         )
//!         .await?;
//!     assert_eq!(wallet.balance, Money::from_dollars(100));
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle},
    metrics::Metrics,
    storage::ScanOrder,
    txn::LedgerTxn,
    types::{Money, Page, Paginated, Posting, UserId, Wallet, WalletTransaction},
    wallet, Config, Error, Result, Storage,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Metrics of this ledger
    metrics: Metrics,

    /// Configuration
    config: Config,
}

/// Ledger/balance consistency check for one wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Wallet owner
    pub user_id: UserId,
    /// Stored wallet balance
    pub balance: Money,
    /// Sum of all entry amounts
    pub ledger_sum: Money,
    /// `balance_after` of the newest entry, if any
    pub last_balance_after: Option<Money>,
    /// Number of entries
    pub entry_count: usize,
    /// Entries whose `balance_after` does not follow from their predecessor
    pub chain_breaks: Vec<String>,
    /// All checks passed
    pub consistent: bool,
}

impl Ledger {
    /// Open ledger with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new()?;

        let handle = spawn_ledger_actor(storage.clone(), metrics.clone(), config.mailbox_capacity);

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = ?config.data_dir,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            storage,
            metrics,
            config,
        })
    }

    /// Run `f` as one atomic unit on the writer actor
    pub async fn transact<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        T: Send + 'static,
        E: From<Error> + Send + 'static,
        F: FnOnce(&mut LedgerTxn<'_>) -> std::result::Result<T, E> + Send + 'static,
    {
        self.handle.transact(f).await
    }

    /// Get-or-create a wallet
    pub async fn get_or_create_wallet(&self, user: UserId) -> Result<Wallet> {
        self.transact(move |txn| wallet::get_or_create(txn, user)).await
    }

    /// Committed wallet, if one exists
    pub fn wallet(&self, user: UserId) -> Result<Option<Wallet>> {
        self.storage.get_wallet(user)
    }

    /// Current balance (zero if the wallet does not exist yet)
    pub fn balance_of(&self, user: UserId) -> Result<Money> {
        Ok(self
            .storage
            .get_wallet(user)?
            .map(|w| w.balance)
            .unwrap_or(Money::ZERO))
    }

    /// Credit a wallet as a standalone unit
    pub async fn credit(&self, user: UserId, amount: Money, posting: Posting) -> Result<Wallet> {
        self.transact(move |txn| wallet::credit(txn, user, amount, posting))
            .await
    }

    /// Debit a wallet as a standalone unit
    pub async fn debit(&self, user: UserId, amount: Money, posting: Posting) -> Result<Wallet> {
        self.transact(move |txn| wallet::debit(txn, user, amount, posting))
            .await
    }

    /// Ledger entries of a user, newest first
    pub fn transactions_for(
        &self,
        user: UserId,
        page: Page,
    ) -> Result<Paginated<WalletTransaction>> {
        let probe = self.storage.entries_for(
            user,
            ScanOrder::Reverse,
            page.offset(),
            Some(page.limit() + 1),
        )?;
        Ok(Paginated::from_probe(probe, page))
    }

    /// Ledger entry by public identifier
    pub fn get_transaction(&self, transaction_id: &str) -> Result<WalletTransaction> {
        self.storage
            .find_transaction(transaction_id)?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))
    }

    /// Recompute the user's balance from the ledger and compare.
    ///
    /// Runs as a read-only unit so the wallet and its entries are observed
    /// at the same point of the log.
    pub async fn audit_wallet(&self, user: UserId) -> Result<AuditReport> {
        self.transact(move |txn| {
            let storage = txn.storage();
            let balance = storage
                .get_wallet(user)?
                .map(|w| w.balance)
                .unwrap_or(Money::ZERO);
            let entries = storage.entries_for(user, ScanOrder::Forward, 0, None)?;
            Ok(audit(user, balance, &entries))
        })
        .await
    }

    /// Direct storage access
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

fn audit(user: UserId, balance: Money, entries: &[WalletTransaction]) -> AuditReport {
    let mut running = Money::ZERO;
    let mut chain_breaks = Vec::new();
    let mut overflowed = false;

    for entry in entries {
        match running.checked_add(entry.amount) {
            Some(next) => running = next,
            None => {
                overflowed = true;
                break;
            }
        }
        if entry.balance_after != running {
            chain_breaks.push(entry.transaction_id.clone());
        }
    }

    let last_balance_after = entries.last().map(|e| e.balance_after);
    let consistent = !overflowed
        && chain_breaks.is_empty()
        && running == balance
        && last_balance_after.map_or(true, |last| last == balance);

    if !consistent {
        tracing::warn!(
            user_id = %user,
            balance = %balance,
            ledger_sum = %running,
            breaks = chain_breaks.len(),
            "Wallet audit found drift"
        );
    }

    AuditReport {
        user_id: user,
        balance,
        ledger_sum: running,
        last_balance_after,
        entry_count: entries.len(),
        chain_breaks,
        consistent,
    }
}
