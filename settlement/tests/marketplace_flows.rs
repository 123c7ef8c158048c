//! End-to-end marketplace scenarios

use chrono::{Duration, Utc};
use ledger_core::{ids, LedgerRef, Money, Page, Posting, TransactionType, UserId};
use rust_decimal::Decimal;
use settlement::{
    Actor, Config, Cryptocurrency, DepositStatus, Error, EscrowStatus, OrderStatus, Product,
    ProductId, ProductType, SettlementEngine,
};
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

const BUYER: u64 = 1;
const SELLER: u64 = 2;
const ADMIN: u64 = 99;

async fn setup(configure: impl FnOnce(&mut Config)) -> (Arc<SettlementEngine>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger_data_dir = temp_dir.path().join("ledger");
    config.ledger.rocksdb.sync_writes = false;
    configure(&mut config);

    let engine = SettlementEngine::new(config).await.unwrap();
    (Arc::new(engine), temp_dir)
}

fn product(id: u64, product_type: ProductType, dollars: i64, stock: u32) -> Product {
    Product {
        id: ProductId(id),
        seller_id: UserId(SELLER),
        title: format!("Listing {}", id),
        description: "Digital goods".to_string(),
        price: Money::from_dollars(dollars),
        product_type,
        download_file: Some(format!("products/{}.zip", id)),
        account_details: Some("user: demo / pass: hunter2".to_string()),
        stock_quantity: stock,
        sold_count: 0,
        is_active: true,
    }
}

async fn list(engine: &SettlementEngine, product: Product) {
    engine
        .upsert_product(Actor::seller(SELLER), product)
        .await
        .unwrap();
}

async fn fund(engine: &SettlementEngine, user: u64, dollars: i64) {
    engine
        .ledger()
        .credit(
            UserId(user),
            Money::from_dollars(dollars),
            Posting::new(TransactionType::Deposit, "Initial funding"),
        )
        .await
        .unwrap();
}

fn balance(engine: &SettlementEngine, user: u64) -> Money {
    engine.ledger().balance_of(UserId(user)).unwrap()
}

/// A sweep time past the default three-day hold
fn past_hold() -> chrono::DateTime<Utc> {
    Utc::now() + Duration::days(3) + Duration::minutes(1)
}

async fn assert_consistent(engine: &SettlementEngine, user: u64) {
    let report = engine.ledger().audit_wallet(UserId(user)).await.unwrap();
    assert!(report.consistent, "wallet {} inconsistent: {:?}", user, report);
}

#[tokio::test]
async fn test_downloadable_purchase_settles_immediately() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(1, ProductType::Downloadable, 40, 10)).await;
    fund(&engine, BUYER, 100).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(1)).await.unwrap();

    assert_eq!(order.status, OrderStatus::Completed);
    assert_eq!(order.escrow_status, EscrowStatus::None);
    assert!(ids::is_order_number(&order.order_number));
    assert_eq!(
        order.delivery_data.as_ref().and_then(|d| d.download_url()),
        Some("products/1.zip")
    );
    assert!(order.delivered_at.is_some());
    assert!(order.completed_at.is_some());

    assert_eq!(balance(&engine, BUYER), Money::from_dollars(60));
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(40));

    let stored = engine.get_product(ProductId(1)).unwrap();
    assert_eq!(stored.stock_quantity, 9);
    assert_eq!(stored.sold_count, 1);

    // Both sides of the sale are in the ledger, tagged with the order
    let buyer_entries = engine
        .transaction_history(Actor::buyer(BUYER), Page::default())
        .unwrap();
    let purchase = &buyer_entries.items[0];
    assert_eq!(purchase.kind, TransactionType::Purchase);
    assert_eq!(purchase.amount, -Money::from_dollars(40));
    assert_eq!(purchase.reference, Some(LedgerRef::Order(order.id.0)));
    assert!(ids::is_transaction_id(&purchase.transaction_id));

    let seller_entries = engine
        .transaction_history(Actor::seller(SELLER), Page::default())
        .unwrap();
    assert_eq!(seller_entries.items.len(), 1);
    assert_eq!(seller_entries.items[0].kind, TransactionType::Sale);
    assert_eq!(seller_entries.items[0].amount, Money::from_dollars(40));

    let seller_wallet = engine.ledger().wallet(UserId(SELLER)).unwrap().unwrap();
    assert_eq!(seller_wallet.total_earned, Money::from_dollars(40));
    let buyer_wallet = engine.ledger().wallet(UserId(BUYER)).unwrap().unwrap();
    assert_eq!(buyer_wallet.total_spent, Money::from_dollars(40));

    assert_consistent(&engine, BUYER).await;
    assert_consistent(&engine, SELLER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_account_purchase_holds_then_releases_once() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(2, ProductType::Account, 40, 1)).await;
    fund(&engine, BUYER, 100).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(2)).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.escrow_status, EscrowStatus::Held);
    assert!(order.escrow_release_at.unwrap() > order.created_at + Duration::hours(71));
    // Credentials stay sealed until release
    assert!(order.delivery_data.is_none());

    assert_eq!(balance(&engine, BUYER), Money::from_dollars(60));
    assert_eq!(balance(&engine, SELLER), Money::ZERO);
    let seller = engine.ledger().wallet(UserId(SELLER)).unwrap().unwrap();
    assert_eq!(seller.pending_balance, Money::from_dollars(40));

    let released = engine
        .release_escrow(Actor::buyer(BUYER), order.id)
        .await
        .unwrap();
    assert_eq!(released.status, OrderStatus::Completed);
    assert_eq!(released.escrow_status, EscrowStatus::Released);
    assert_eq!(
        released.delivery_data.as_ref().and_then(|d| d.account_details()),
        Some("user: demo / pass: hunter2")
    );

    assert_eq!(balance(&engine, SELLER), Money::from_dollars(40));
    let seller = engine.ledger().wallet(UserId(SELLER)).unwrap().unwrap();
    assert_eq!(seller.pending_balance, Money::ZERO);

    let err = engine
        .release_escrow(Actor::seller(SELLER), order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrderNotCompletable { .. }));
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(40));

    assert_consistent(&engine, SELLER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_releases_due_escrow() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(3, ProductType::Account, 25, 2)).await;
    fund(&engine, BUYER, 100).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(3)).await.unwrap();
    assert_eq!(order.escrow_status, EscrowStatus::Held);

    let report = engine
        .sweep_expired_escrows(past_hold())
        .await
        .unwrap();
    assert_eq!(report.released, vec![order.order_number.clone()]);

    let swept = engine.get_order(Actor::admin(ADMIN), order.id).unwrap();
    assert_eq!(swept.status, OrderStatus::Completed);
    assert_eq!(swept.escrow_status, EscrowStatus::Released);
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(25));

    // Re-running finds nothing left to do
    let again = engine
        .sweep_expired_escrows(past_hold())
        .await
        .unwrap();
    assert_eq!(again.examined, 0);
    assert!(again.released.is_empty());
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(25));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_ignores_escrow_not_yet_due() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(4, ProductType::Account, 25, 1)).await;
    fund(&engine, BUYER, 100).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(4)).await.unwrap();

    let report = engine.sweep_expired_escrows(Utc::now()).await.unwrap();
    assert_eq!(report.examined, 0);

    let report = engine
        .sweep_expired_escrows(Utc::now() + Duration::days(4))
        .await
        .unwrap();
    assert_eq!(report.released, vec![order.order_number]);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_release_after_sweep_is_rejected() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(5, ProductType::Account, 30, 1)).await;
    fund(&engine, BUYER, 30).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(5)).await.unwrap();
    engine
        .sweep_expired_escrows(past_hold())
        .await
        .unwrap();

    let err = engine
        .release_escrow(Actor::buyer(BUYER), order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrderNotCompletable { .. }));
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(30));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sweep_racing_manual_release_pays_once() {
    const ORDERS: u32 = 5;

    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(12, ProductType::Account, 10, ORDERS)).await;
    fund(&engine, BUYER, 10 * ORDERS as i64).await;

    let mut orders = Vec::new();
    for _ in 0..ORDERS {
        orders.push(engine.purchase(Actor::buyer(BUYER), ProductId(12)).await.unwrap());
    }

    let sweep = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sweep_expired_escrows(past_hold()).await })
    };
    let mut releases = Vec::new();
    for order in &orders {
        let engine = engine.clone();
        let order_id = order.id;
        releases.push(tokio::spawn(async move {
            engine.release_escrow(Actor::buyer(BUYER), order_id).await
        }));
    }

    let swept = sweep.await.unwrap().unwrap();
    let mut manual = 0;
    for release in releases {
        match release.await.unwrap() {
            Ok(_) => manual += 1,
            Err(Error::OrderNotCompletable { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    // Every order settled exactly once, by one side or the other
    assert_eq!(swept.released.len() + manual, ORDERS as usize);
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(10 * ORDERS as i64));
    let seller = engine.ledger().wallet(UserId(SELLER)).unwrap().unwrap();
    assert_eq!(seller.pending_balance, Money::ZERO);

    let sales = engine
        .transaction_history(Actor::seller(SELLER), Page::default())
        .unwrap();
    assert_eq!(sales.items.len(), ORDERS as usize);

    assert_consistent(&engine, SELLER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refund_returns_exact_amount() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(6, ProductType::Account, 40, 1)).await;
    fund(&engine, BUYER, 100).await;

    let order = engine.purchase(Actor::buyer(BUYER), ProductId(6)).await.unwrap();

    // Buyers cannot refund themselves
    let err = engine
        .refund_escrow(Actor::buyer(BUYER), order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    let refunded = engine
        .refund_escrow(Actor::seller(SELLER), order.id)
        .await
        .unwrap();
    assert_eq!(refunded.status, OrderStatus::Refunded);
    assert_eq!(refunded.escrow_status, EscrowStatus::Refunded);
    assert!(refunded.delivery_data.is_none());

    assert_eq!(balance(&engine, BUYER), Money::from_dollars(100));
    assert_eq!(balance(&engine, SELLER), Money::ZERO);
    let seller = engine.ledger().wallet(UserId(SELLER)).unwrap().unwrap();
    assert_eq!(seller.pending_balance, Money::ZERO);

    // Terminal: neither release nor a second refund moves money
    assert!(matches!(
        engine.release_escrow(Actor::admin(ADMIN), order.id).await,
        Err(Error::OrderNotCompletable { .. })
    ));
    assert!(matches!(
        engine.refund_escrow(Actor::admin(ADMIN), order.id).await,
        Err(Error::OrderNotCompletable { .. })
    ));
    assert_eq!(balance(&engine, BUYER), Money::from_dollars(100));

    assert_consistent(&engine, BUYER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_purchases_single_winner() {
    const ATTEMPTS: usize = 8;

    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(7, ProductType::Downloadable, 40, ATTEMPTS as u32)).await;
    fund(&engine, BUYER, 40).await;

    let mut tasks = Vec::new();
    for _ in 0..ATTEMPTS {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.purchase(Actor::buyer(BUYER), ProductId(7)).await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(Error::InsufficientFunds { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(insufficient, ATTEMPTS - 1);
    assert_eq!(balance(&engine, BUYER), Money::ZERO);
    assert_eq!(
        engine.get_product(ProductId(7)).unwrap().stock_quantity,
        ATTEMPTS as u32 - 1
    );

    assert_consistent(&engine, BUYER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_releases_pay_once() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(8, ProductType::Account, 40, 1)).await;
    fund(&engine, BUYER, 40).await;
    let order = engine.purchase(Actor::buyer(BUYER), ProductId(8)).await.unwrap();

    let mut tasks = Vec::new();
    for actor in [Actor::buyer(BUYER), Actor::seller(SELLER), Actor::admin(ADMIN)] {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.release_escrow(actor, order.id).await
        }));
    }

    let mut released = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            released += 1;
        }
    }

    assert_eq!(released, 1);
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(40));
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_purchase_failures_leave_no_trace() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(9, ProductType::Downloadable, 40, 1)).await;
    fund(&engine, BUYER, 39).await;

    let err = engine
        .purchase(Actor::buyer(BUYER), ProductId(9))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));

    assert_eq!(balance(&engine, BUYER), Money::from_dollars(39));
    assert_eq!(engine.get_product(ProductId(9)).unwrap().stock_quantity, 1);
    let history = engine
        .order_history(Actor::buyer(BUYER), Page::default())
        .unwrap();
    assert!(history.items.is_empty());

    // Buying the last unit leaves the listing out of stock
    fund(&engine, BUYER, 1).await;
    engine.purchase(Actor::buyer(BUYER), ProductId(9)).await.unwrap();
    fund(&engine, BUYER, 40).await;
    let err = engine
        .purchase(Actor::buyer(BUYER), ProductId(9))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OutOfStock(_)));
    assert_eq!(balance(&engine, BUYER), Money::from_dollars(40));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deposit_credits_usd_once() {
    let (engine, _temp) = setup(|_| {}).await;

    let deposit = engine
        .create_deposit(Actor::buyer(BUYER), Cryptocurrency::Btc, Decimal::from(50))
        .await
        .unwrap();

    assert_eq!(deposit.status, DepositStatus::Pending);
    assert_eq!(deposit.usd_amount, Money::from_dollars(50));
    assert_eq!(deposit.exchange_rate, Decimal::from(45_000));
    assert_eq!(
        deposit.crypto_amount,
        (Decimal::from(50) / Decimal::from(45_000)).round_dp(8)
    );
    assert_eq!(deposit.crypto_amount, Decimal::from_str("0.00111111").unwrap());
    assert_eq!(deposit.wallet_address.len(), 34);
    assert_eq!(deposit.required_confirmations, 3);
    assert_eq!(deposit.expires_at - deposit.created_at, Duration::hours(2));

    let wallet = engine
        .confirm_deposit(Actor::buyer(BUYER), deposit.id)
        .await
        .unwrap();
    assert_eq!(wallet.balance, Money::from_cents(5_000));

    let err = engine
        .confirm_deposit(Actor::buyer(BUYER), deposit.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyConfirmed { .. }));
    assert_eq!(balance(&engine, BUYER), Money::from_dollars(50));

    let confirmed = engine.get_deposit(Actor::buyer(BUYER), deposit.id).unwrap();
    assert_eq!(confirmed.status, DepositStatus::Confirmed);
    assert!(confirmed
        .transaction_hash
        .as_deref()
        .map_or(false, |hash| hash.starts_with("demo-")));

    let entries = engine
        .transaction_history(Actor::buyer(BUYER), Page::default())
        .unwrap();
    assert_eq!(entries.items.len(), 1);
    assert_eq!(entries.items[0].kind, TransactionType::Deposit);
    assert_eq!(entries.items[0].reference, Some(LedgerRef::Deposit(deposit.id.0)));

    assert_consistent(&engine, BUYER).await;
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deposit_rules() {
    let (engine, _temp) = setup(|_| {}).await;

    for usd in [Decimal::new(999, 2), Decimal::new(1_000_001, 2)] {
        let err = engine
            .create_deposit(Actor::buyer(BUYER), Cryptocurrency::Eth, usd)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }

    let deposit = engine
        .create_deposit(Actor::buyer(BUYER), Cryptocurrency::Usdt, Decimal::new(2_550, 2))
        .await
        .unwrap();
    assert!(deposit.wallet_address.starts_with("0x"));
    assert_eq!(deposit.wallet_address.len(), 42);

    // Only the owner may confirm
    let err = engine
        .confirm_deposit(Actor::buyer(3), deposit.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
    assert!(matches!(
        engine.get_deposit(Actor::buyer(3), deposit.id),
        Err(Error::Unauthorized(_))
    ));

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_expired_deposit_never_credits() {
    let (engine, _temp) = setup(|_| {}).await;

    let deposit = engine
        .create_deposit(Actor::buyer(BUYER), Cryptocurrency::Btc, Decimal::from(20))
        .await
        .unwrap();

    assert_eq!(engine.expire_deposits(Utc::now()).await.unwrap(), 0);
    assert_eq!(
        engine
            .expire_deposits(deposit.expires_at + Duration::seconds(1))
            .await
            .unwrap(),
        1
    );

    let expired = engine.get_deposit(Actor::buyer(BUYER), deposit.id).unwrap();
    assert_eq!(expired.status, DepositStatus::Expired);

    let err = engine
        .confirm_deposit(Actor::buyer(BUYER), deposit.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyConfirmed { .. }));
    assert_eq!(balance(&engine, BUYER), Money::ZERO);

    // Idempotent
    assert_eq!(
        engine
            .expire_deposits(deposit.expires_at + Duration::seconds(1))
            .await
            .unwrap(),
        0
    );

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_order_history_and_snapshot() {
    let (engine, _temp) = setup(|_| {}).await;
    list(&engine, product(10, ProductType::Downloadable, 5, 10)).await;
    fund(&engine, BUYER, 100).await;

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let order = engine.purchase(Actor::buyer(BUYER), ProductId(10)).await.unwrap();
        numbers.push(order.order_number);
        // Distinct millisecond keys keep the newest-first order deterministic
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let first = engine
        .order_history(Actor::buyer(BUYER), Page::new(1, 2))
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.items[0].order_number, numbers[2]);
    assert_eq!(first.items[1].order_number, numbers[1]);

    let second = engine
        .order_history(Actor::buyer(BUYER), Page::new(2, 2))
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_more);
    assert_eq!(second.items[0].order_number, numbers[0]);

    // The seller sees the same orders
    let seller_view = engine
        .order_history(Actor::seller(SELLER), Page::default())
        .unwrap();
    assert_eq!(seller_view.items.len(), 3);

    // Snapshots never carry seller-internal fields
    let order = &first.items[0];
    assert_eq!(order.product_data.title, "Listing 10");
    assert_eq!(order.product_data.price, Money::from_dollars(5));

    engine
        .create_deposit(Actor::buyer(BUYER), Cryptocurrency::Btc, Decimal::from(10))
        .await
        .unwrap();
    let snapshot = engine.wallet_snapshot(Actor::buyer(BUYER)).await.unwrap();
    assert_eq!(snapshot.wallet.balance, Money::from_dollars(85));
    assert_eq!(snapshot.transactions.items.len(), 4);
    assert_eq!(snapshot.recent_deposits.len(), 1);

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger_data_dir = temp_dir.path().join("ledger");

    let order = {
        let engine = SettlementEngine::new(config.clone()).await.unwrap();
        list(&engine, product(11, ProductType::Account, 15, 1)).await;
        fund(&engine, BUYER, 15).await;
        let order = engine.purchase(Actor::buyer(BUYER), ProductId(11)).await.unwrap();
        engine.shutdown().await.unwrap();
        order
    };
    tokio::task::yield_now().await;

    let engine = SettlementEngine::new(config).await.unwrap();
    let reloaded = engine.get_order(Actor::buyer(BUYER), order.id).unwrap();
    assert_eq!(reloaded, order);

    // The due-date index was persisted with the order
    let report = engine
        .sweep_expired_escrows(past_hold())
        .await
        .unwrap();
    assert_eq!(report.released, vec![order.order_number]);
    assert_eq!(balance(&engine, SELLER), Money::from_dollars(15));

    engine.shutdown().await.unwrap();
}
