//! Main settlement engine
//!
//! Orchestrates purchases, escrow resolution, crypto deposits and the
//! read-side queries. Every mutating operation is one atomic unit on the
//! ledger writer, so its checks and its writes see the same state.

use crate::{
    config::Config,
    deposit, escrow, index,
    rates::{ExchangeRates, StaticRates},
    types::*,
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{
    ids, wallet, Ledger, LedgerRef, LedgerTxn, Money, Page, Paginated, Posting, ScanOrder,
    TransactionType, UserId, Wallet, WalletTransaction,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Buyer instructions for file deliveries
const DOWNLOAD_INSTRUCTIONS: &str = "Click the download link to get your file.";

/// Buyer instructions for account deliveries
const ACCOUNT_INSTRUCTIONS: &str = "Use these credentials to sign in and change the password.";

/// Deposits shown in a wallet snapshot
const SNAPSHOT_DEPOSITS: usize = 5;

/// Wallet overview for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Wallet
    pub wallet: Wallet,
    /// First page of ledger entries, newest first
    pub transactions: Paginated<WalletTransaction>,
    /// Latest deposits, newest first
    pub recent_deposits: Vec<CryptoDeposit>,
}

/// Settlement engine
#[derive(Debug)]
pub struct SettlementEngine {
    /// Ledger core
    ledger: Arc<Ledger>,

    /// Exchange-rate collaborator
    rates: Arc<dyn ExchangeRates>,

    /// Configuration
    config: Config,
}

impl SettlementEngine {
    /// Create new settlement engine, opening its ledger
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let ledger = Arc::new(Ledger::open(config.ledger_config()).await?);
        Ok(Self::with_ledger(ledger, config))
    }

    /// Engine over an already open ledger
    pub fn with_ledger(ledger: Arc<Ledger>, config: Config) -> Self {
        let rates = Arc::new(StaticRates::from_config(&config.rates));
        Self {
            ledger,
            rates,
            config,
        }
    }

    /// Replace the exchange-rate collaborator
    pub fn with_rates(mut self, rates: Arc<dyn ExchangeRates>) -> Self {
        self.rates = rates;
        self
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // Catalog

    /// Mirror a catalog product into the store.
    ///
    /// Sellers may only write their own listings; admins may write any.
    pub async fn upsert_product(&self, actor: Actor, product: Product) -> Result<Product> {
        validate_product(&product)?;

        let stored = self
            .ledger
            .transact(move |txn| -> Result<Product> {
                let key = product.id.0.to_be_bytes();
                let existing: Option<Product> = txn.get(&key)?;

                let owns = |seller: UserId| actor.is_admin() || actor.user_id == seller;
                if !owns(product.seller_id) || existing.as_ref().map_or(false, |p| !owns(p.seller_id)) {
                    return Err(Error::Unauthorized(format!(
                        "user {} may not list product {}",
                        actor.user_id, product.id
                    )));
                }

                txn.put(&product)?;
                Ok(product)
            })
            .await?;

        tracing::debug!(product_id = %stored.id, stock = stored.stock_quantity, "Product upserted");
        Ok(stored)
    }

    /// Mirrored product
    pub fn get_product(&self, product_id: ProductId) -> Result<Product> {
        self.ledger
            .storage()
            .get_record::<Product>(&product_id.0.to_be_bytes())?
            .ok_or_else(|| Error::not_found("Product", product_id))
    }

    // Purchases and escrow

    /// Buy one unit of a product.
    ///
    /// Checks, in order: the product exists and is active, it is in stock,
    /// the buyer can pay. Then debits the buyer, moves stock and either
    /// settles immediately (downloadable) or holds the amount in escrow
    /// (account), all in one unit.
    pub async fn purchase(&self, actor: Actor, product_id: ProductId) -> Result<Order> {
        let hold_period = self.config.escrow.hold_period()?;

        let order = self
            .ledger
            .transact(move |txn| -> Result<Order> {
                let mut product: Product = txn
                    .get::<Product>(&product_id.0.to_be_bytes())?
                    .filter(|p| p.is_active)
                    .ok_or_else(|| Error::not_found("Product", product_id))?;

                if product.stock_quantity == 0 {
                    return Err(Error::OutOfStock(product.id.to_string()));
                }

                let buyer = txn.wallet(actor.user_id)?;
                if buyer.balance < product.price {
                    return Err(Error::InsufficientFunds {
                        user: actor.user_id,
                        required: product.price,
                        available: buyer.balance,
                    });
                }

                let now = txn.now();
                let order_number = txn.unique_identifier(index::ORDER_NUMBER, ids::order_number)?;
                let mut order = Order::open(
                    OrderId::new(),
                    order_number,
                    actor.user_id,
                    &product,
                    now,
                    hold_period,
                )?;
                let reference = LedgerRef::Order(order.id.0);

                wallet::debit(
                    txn,
                    order.buyer_id,
                    order.amount,
                    Posting::new(TransactionType::Purchase, format!("Purchase of {}", product.title))
                        .with_reference(reference)
                        .with_metadata("order_number", order.order_number.clone()),
                )?;

                product.stock_quantity -= 1;
                product.sold_count = product.sold_count.saturating_add(1);
                txn.put(&product)?;

                let sealed_delivery = match product.product_type {
                    ProductType::Downloadable => {
                        wallet::credit(
                            txn,
                            order.seller_id,
                            order.amount,
                            Posting::new(TransactionType::Sale, format!("Sale of {}", product.title))
                                .with_reference(reference)
                                .with_metadata("order_number", order.order_number.clone()),
                        )?;
                        order.settle_immediately(
                            DeliveryData::Download {
                                download_url: product.download_file.clone().unwrap_or_default(),
                                instructions: DOWNLOAD_INSTRUCTIONS.to_string(),
                            },
                            now,
                        )?;
                        None
                    }
                    ProductType::Account => {
                        wallet::hold_pending(txn, order.seller_id, order.amount)?;
                        if let Some(release_at) = order.escrow_release_at {
                            txn.put_index(index::escrow_due(release_at, order.id.0), Vec::new());
                        }
                        Some(DeliveryData::Account {
                            account_details: product.account_details.clone().unwrap_or_default(),
                            instructions: ACCOUNT_INSTRUCTIONS.to_string(),
                        })
                    }
                };

                stage_order_indices(txn, &order);
                txn.put(&OrderRecord {
                    order: order.clone(),
                    sealed_delivery,
                })?;

                Ok(order)
            })
            .await?;

        tracing::info!(
            order_number = %order.order_number,
            buyer_id = %order.buyer_id,
            seller_id = %order.seller_id,
            amount = %order.amount,
            status = %order.status,
            escrow_status = %order.escrow_status,
            "Order placed"
        );

        Ok(order)
    }

    /// Release a held escrow to the seller. Buyer, seller or admin.
    pub async fn release_escrow(&self, actor: Actor, order_id: OrderId) -> Result<Order> {
        self.ledger
            .transact(move |txn| {
                let record = load_order(txn, order_id)?;
                if !(actor.is_admin() || record.order.is_party(actor.user_id)) {
                    return Err(Error::Unauthorized(format!(
                        "user {} is not a party to order {}",
                        actor.user_id, record.order.order_number
                    )));
                }
                escrow::release_in(txn, record)
            })
            .await
    }

    /// Refund a held escrow to the buyer. Seller or admin.
    pub async fn refund_escrow(&self, actor: Actor, order_id: OrderId) -> Result<Order> {
        self.ledger
            .transact(move |txn| {
                let record = load_order(txn, order_id)?;
                if !(actor.is_admin() || record.order.seller_id == actor.user_id) {
                    return Err(Error::Unauthorized(format!(
                        "user {} may not refund order {}",
                        actor.user_id, record.order.order_number
                    )));
                }
                escrow::refund_in(txn, record)
            })
            .await
    }

    /// Release every held escrow whose deadline is at or before `as_of`.
    ///
    /// Safe to re-run and to race with manual releases: each order is
    /// released in its own unit only if it is still held and due.
    pub async fn sweep_expired_escrows(&self, as_of: DateTime<Utc>) -> Result<SweepReport> {
        let (start, end) = index::due_range(index::ESCROW_DUE, as_of);
        let due = self.ledger.storage().scan_range(
            &start,
            &end,
            Some(self.config.escrow.sweep_batch_size),
        )?;

        let mut report = SweepReport {
            examined: due.len(),
            ..SweepReport::default()
        };

        for (key, _) in due {
            let Some(id) = index::trailing_id(&key) else {
                tracing::warn!(key = ?key, "Malformed escrow due entry");
                report.skipped += 1;
                continue;
            };

            let released = self
                .ledger
                .transact(move |txn| -> Result<Option<String>> {
                    let record = load_order(txn, OrderId(id))?;
                    if !record.order.is_due(as_of) {
                        return Ok(None);
                    }
                    escrow::release_in(txn, record).map(|order| Some(order.order_number))
                })
                .await;

            match released {
                Ok(Some(order_number)) => report.released.push(order_number),
                Ok(None) => report.skipped += 1,
                Err(e) if is_writer_down(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(order_id = %id, error = %e, "Escrow release failed during sweep");
                    report.skipped += 1;
                }
            }
        }

        if !report.released.is_empty() {
            tracing::info!(
                released = report.released.len(),
                skipped = report.skipped,
                "Escrow sweep released orders"
            );
        }

        Ok(report)
    }

    // Deposits

    /// Open a crypto deposit request for `usd_amount`
    pub async fn create_deposit(
        &self,
        actor: Actor,
        cryptocurrency: Cryptocurrency,
        usd_amount: Decimal,
    ) -> Result<CryptoDeposit> {
        deposit::check_bounds(usd_amount, &self.config.deposits)?;
        let usd = Money::from_decimal(usd_amount)?;
        let rate = self.rates.usd_rate(cryptocurrency)?;
        let config = self.config.deposits.clone();

        let deposit = self
            .ledger
            .transact(move |txn| -> Result<CryptoDeposit> {
                let deposit = CryptoDeposit::open(
                    actor.user_id,
                    cryptocurrency,
                    usd,
                    rate,
                    &config,
                    txn.now(),
                )?;

                txn.put_index(
                    index::deposit_by_user(deposit.user_id, deposit.created_at, deposit.id.0),
                    Vec::new(),
                );
                txn.put_index(
                    index::deposit_expiry(deposit.expires_at, deposit.id.0),
                    Vec::new(),
                );
                txn.put(&deposit)?;
                Ok(deposit)
            })
            .await?;

        tracing::info!(
            deposit_id = %deposit.id,
            user_id = %deposit.user_id,
            currency = %deposit.cryptocurrency,
            usd_amount = %deposit.usd_amount,
            crypto_amount = %deposit.crypto_amount,
            "Crypto deposit created"
        );

        Ok(deposit)
    }

    /// Confirm a deposit and credit its USD amount. Owner only; at most once.
    pub async fn confirm_deposit(&self, actor: Actor, deposit_id: DepositId) -> Result<Wallet> {
        let confirmations = self.config.deposits.simulated_confirmations;

        let wallet = self
            .ledger
            .transact(move |txn| -> Result<Wallet> {
                let mut deposit: CryptoDeposit = txn
                    .get(deposit_id.0.as_bytes())?
                    .ok_or_else(|| Error::not_found("Deposit", deposit_id))?;

                if deposit.user_id != actor.user_id {
                    return Err(Error::Unauthorized(format!(
                        "deposit {} does not belong to user {}",
                        deposit_id, actor.user_id
                    )));
                }

                let now = txn.now();
                deposit.confirm(confirmations, deposit::simulated_hash(), now)?;

                let wallet = wallet::credit(
                    txn,
                    deposit.user_id,
                    deposit.usd_amount,
                    Posting::new(
                        TransactionType::Deposit,
                        format!("Crypto deposit ({})", deposit.cryptocurrency),
                    )
                    .with_reference(LedgerRef::Deposit(deposit.id.0))
                    .with_metadata("cryptocurrency", deposit.cryptocurrency.as_str())
                    .with_metadata("crypto_amount", deposit.crypto_amount.to_string()),
                )?;

                txn.delete_index(index::deposit_expiry(deposit.expires_at, deposit.id.0));
                txn.put(&deposit)?;
                Ok(wallet)
            })
            .await?;

        tracing::info!(
            deposit_id = %deposit_id,
            user_id = %actor.user_id,
            balance = %wallet.balance,
            "Crypto deposit confirmed"
        );

        Ok(wallet)
    }

    /// Expire every pending deposit whose deadline is at or before `as_of`.
    /// Returns how many were expired.
    pub async fn expire_deposits(&self, as_of: DateTime<Utc>) -> Result<usize> {
        let (start, end) = index::due_range(index::DEPOSIT_EXPIRY, as_of);
        let due = self.ledger.storage().scan_range(&start, &end, None)?;

        let mut expired = 0;
        for (key, _) in due {
            let Some(id) = index::trailing_id(&key) else {
                tracing::warn!(key = ?key, "Malformed deposit expiry entry");
                continue;
            };

            let changed = self
                .ledger
                .transact(move |txn| -> Result<bool> {
                    let Some(mut deposit) = txn.get::<CryptoDeposit>(id.as_bytes())? else {
                        return Ok(false);
                    };
                    if !deposit.is_overdue(as_of) {
                        return Ok(false);
                    }

                    deposit.expire();
                    txn.delete_index(index::deposit_expiry(deposit.expires_at, deposit.id.0));
                    txn.put(&deposit)?;
                    Ok(true)
                })
                .await;

            match changed {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) if is_writer_down(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!(deposit_id = %id, error = %e, "Deposit expiry failed during sweep");
                }
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Expired pending deposits");
        }

        Ok(expired)
    }

    // Queries

    /// Wallet, first page of history and latest deposits
    pub async fn wallet_snapshot(&self, actor: Actor) -> Result<WalletSnapshot> {
        let wallet = self.ledger.get_or_create_wallet(actor.user_id).await?;
        Ok(WalletSnapshot {
            wallet,
            transactions: self.transaction_history(actor, Page::default())?,
            recent_deposits: self.deposits_for(actor, SNAPSHOT_DEPOSITS)?,
        })
    }

    /// Ledger entries of the actor, newest first
    pub fn transaction_history(
        &self,
        actor: Actor,
        page: Page,
    ) -> Result<Paginated<WalletTransaction>> {
        Ok(self.ledger.transactions_for(actor.user_id, page)?)
    }

    /// Orders where the actor is buyer or seller, newest first
    pub fn order_history(&self, actor: Actor, page: Page) -> Result<Paginated<Order>> {
        let storage = self.ledger.storage();
        let keys = storage.scan_prefix(
            &index::orders_of(actor.user_id),
            ScanOrder::Reverse,
            page.offset(),
            Some(page.limit() + 1),
        )?;

        let orders = keys
            .iter()
            .filter_map(|(key, _)| index::trailing_id(key))
            .map(|id| self.read_order(OrderId(id)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Paginated::from_probe(orders, page))
    }

    /// One order, visible to its buyer, its seller and admins
    pub fn get_order(&self, actor: Actor, order_id: OrderId) -> Result<Order> {
        let order = self.read_order(order_id)?;
        if !(actor.is_admin() || order.is_party(actor.user_id)) {
            return Err(Error::Unauthorized(format!(
                "user {} may not view order {}",
                actor.user_id, order.order_number
            )));
        }
        Ok(order)
    }

    /// One order by its public number
    pub fn find_order(&self, actor: Actor, order_number: &str) -> Result<Order> {
        let value = self
            .ledger
            .storage()
            .index_get(&index::order_number(order_number))?
            .ok_or_else(|| Error::not_found("Order", order_number))?;
        let id = index::trailing_id(&value).ok_or_else(|| Error::not_found("Order", order_number))?;
        self.get_order(actor, OrderId(id))
    }

    /// Latest deposits of the actor, newest first
    pub fn deposits_for(&self, actor: Actor, limit: usize) -> Result<Vec<CryptoDeposit>> {
        let storage = self.ledger.storage();
        storage
            .scan_prefix(&index::deposits_of(actor.user_id), ScanOrder::Reverse, 0, Some(limit))?
            .iter()
            .filter_map(|(key, _)| index::trailing_id(key))
            .map(|id| {
                storage
                    .get_record::<CryptoDeposit>(id.as_bytes())?
                    .ok_or_else(|| Error::not_found("Deposit", id))
            })
            .collect()
    }

    /// One deposit, visible to its owner and admins
    pub fn get_deposit(&self, actor: Actor, deposit_id: DepositId) -> Result<CryptoDeposit> {
        let deposit = self
            .ledger
            .storage()
            .get_record::<CryptoDeposit>(deposit_id.0.as_bytes())?
            .ok_or_else(|| Error::not_found("Deposit", deposit_id))?;
        if !(actor.is_admin() || deposit.user_id == actor.user_id) {
            return Err(Error::Unauthorized(format!(
                "user {} may not view deposit {}",
                actor.user_id, deposit_id
            )));
        }
        Ok(deposit)
    }

    /// Shutdown engine
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down settlement engine");
        Ok(self.ledger.shutdown().await?)
    }

    fn read_order(&self, order_id: OrderId) -> Result<Order> {
        self.ledger
            .storage()
            .get_record::<OrderRecord>(order_id.0.as_bytes())?
            .map(|record| record.order)
            .ok_or_else(|| Error::not_found("Order", order_id))
    }
}

/// The ledger writer is gone; nothing later in a sweep can succeed either
fn is_writer_down(err: &Error) -> bool {
    matches!(err, Error::Ledger(ledger_core::Error::Concurrency(_)))
}

fn validate_product(product: &Product) -> Result<()> {
    if product.price.is_negative() {
        return Err(Error::InvalidAmount(format!(
            "product {} has negative price {}",
            product.id, product.price
        )));
    }

    let payload = match product.product_type {
        ProductType::Downloadable => &product.download_file,
        ProductType::Account => &product.account_details,
    };
    if payload.as_deref().map_or(true, str::is_empty) {
        return Err(Error::InvalidProduct(format!(
            "{} product {} has no delivery payload",
            product.product_type.as_str(),
            product.id
        )));
    }

    Ok(())
}

fn load_order(txn: &LedgerTxn<'_>, order_id: OrderId) -> Result<OrderRecord> {
    txn.get::<OrderRecord>(order_id.0.as_bytes())?
        .ok_or_else(|| Error::not_found("Order", order_id))
}

fn stage_order_indices(txn: &mut LedgerTxn<'_>, order: &Order) {
    let id = order.id.0;
    txn.put_index(index::order_number(&order.order_number), id.as_bytes().to_vec());
    txn.put_index(index::order_by_party(order.buyer_id, order.created_at, id), Vec::new());
    txn.put_index(index::order_by_party(order.seller_id, order.created_at, id), Vec::new());
}
