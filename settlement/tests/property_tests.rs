//! Property-based tests for settlement invariants
//!
//! Random purchase, release and refund sequences must keep:
//! - Ledger/balance consistency for buyer and seller
//! - Conservation: funded money is either spendable or held in escrow
//! - `pending_balance` equal to the amount still held on orders

use ledger_core::{Money, Page, Posting, TransactionType, UserId};
use proptest::prelude::*;
use settlement::{
    Actor, Config, Error, EscrowStatus, OrderId, Product, ProductId, ProductType,
    SettlementEngine,
};
use tempfile::TempDir;

const BUYER: u64 = 1;
const SELLER: u64 = 2;

#[derive(Debug, Clone)]
enum Op {
    Fund { cents: i64 },
    Buy { product: u64 },
    Release { pick: usize },
    Refund { pick: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (100i64..20_000).prop_map(|cents| Op::Fund { cents }),
        (1u64..=2).prop_map(|product| Op::Buy { product }),
        any::<usize>().prop_map(|pick| Op::Release { pick }),
        any::<usize>().prop_map(|pick| Op::Refund { pick }),
    ]
}

async fn create_engine() -> (SettlementEngine, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.ledger_data_dir = temp_dir.path().join("ledger");
    config.ledger.rocksdb.sync_writes = false;

    let engine = SettlementEngine::new(config).await.unwrap();
    for (id, product_type, cents) in [
        (1, ProductType::Downloadable, 1_250),
        (2, ProductType::Account, 3_999),
    ] {
        engine
            .upsert_product(
                Actor::seller(SELLER),
                Product {
                    id: ProductId(id),
                    seller_id: UserId(SELLER),
                    title: format!("Item {}", id),
                    description: String::new(),
                    price: Money::from_cents(cents),
                    product_type,
                    download_file: Some("files/item.zip".to_string()),
                    account_details: Some("login:secret".to_string()),
                    stock_quantity: 1_000,
                    sold_count: 0,
                    is_active: true,
                },
            )
            .await
            .unwrap();
    }

    (engine, temp_dir)
}

/// Apply ops, returning the total funded in cents
async fn apply(engine: &SettlementEngine, ops: &[Op]) -> i64 {
    let mut funded = 0;
    let mut escrowed: Vec<OrderId> = Vec::new();

    for op in ops {
        match op {
            Op::Fund { cents } => {
                engine
                    .ledger()
                    .credit(
                        UserId(BUYER),
                        Money::from_cents(*cents),
                        Posting::new(TransactionType::Deposit, "funding"),
                    )
                    .await
                    .unwrap();
                funded += cents;
            }
            Op::Buy { product } => {
                match engine.purchase(Actor::buyer(BUYER), ProductId(*product)).await {
                    Ok(order) if order.escrow_status == EscrowStatus::Held => escrowed.push(order.id),
                    Ok(_) => {}
                    Err(Error::InsufficientFunds { .. }) => {}
                    Err(other) => panic!("unexpected purchase error: {}", other),
                }
            }
            Op::Release { pick } | Op::Refund { pick } => {
                if escrowed.is_empty() {
                    continue;
                }
                let order_id = escrowed[pick % escrowed.len()];
                let result = match op {
                    Op::Release { .. } => engine.release_escrow(Actor::buyer(BUYER), order_id).await,
                    _ => engine.refund_escrow(Actor::seller(SELLER), order_id).await,
                };
                match result {
                    Ok(_) | Err(Error::OrderNotCompletable { .. }) => {}
                    Err(other) => panic!("unexpected escrow error: {}", other),
                }
            }
        }
    }

    funded
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: every settlement sequence keeps both wallets consistent and conserves money
    #[test]
    fn prop_settlement_conserves_money(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (engine, _temp) = create_engine().await;
            let funded = apply(&engine, &ops).await;

            for user in [BUYER, SELLER] {
                let report = engine.ledger().audit_wallet(UserId(user)).await.unwrap();
                prop_assert!(report.consistent, "{:?}", report);
            }

            let buyer = engine.ledger().get_or_create_wallet(UserId(BUYER)).await.unwrap();
            let seller = engine.ledger().get_or_create_wallet(UserId(SELLER)).await.unwrap();
            prop_assert!(!buyer.balance.is_negative());
            prop_assert_eq!(
                buyer.balance.cents() + seller.balance.cents() + seller.pending_balance.cents(),
                funded
            );

            let orders = engine
                .order_history(Actor::seller(SELLER), Page::new(1, 1_000))
                .unwrap();
            let held: i64 = orders
                .items
                .iter()
                .filter(|o| o.escrow_status == EscrowStatus::Held)
                .map(|o| o.amount.cents())
                .sum();
            prop_assert_eq!(seller.pending_balance.cents(), held);

            engine.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
