//! Order and escrow state machine
//!
//! ```text
//!   downloadable:  processing/none ──settle──▶ completed/none
//!
//!   account:       pending/held ──release──▶ completed/released
//!                              └──refund───▶ refunded/refunded
//! ```
//!
//! Escrow only moves forward and `completed`, `cancelled`, `refunded` are
//! terminal. Every money-moving transition re-checks `held` inside the unit
//! that performs it, so concurrent releases, refunds and sweeps converge to
//! exactly one effect.

use crate::{
    index,
    types::{
        DeliveryData, EscrowStatus, Order, OrderId, OrderRecord, OrderStatus, Product,
        ProductSnapshot, ProductType,
    },
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use ledger_core::{wallet, LedgerRef, LedgerTxn, Posting, TransactionType, UserId};

impl OrderStatus {
    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Allowed lifecycle moves
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(next, Processing | Completed | Cancelled | Refunded | Disputed),
            Processing => matches!(next, Completed | Cancelled | Refunded | Disputed),
            Disputed => matches!(next, Completed | Cancelled | Refunded),
            Completed | Cancelled | Refunded => false,
        }
    }
}

impl EscrowStatus {
    /// Escrow only moves forward: none → held → released | refunded
    pub fn can_transition_to(&self, next: EscrowStatus) -> bool {
        matches!(
            (self, next),
            (EscrowStatus::None, EscrowStatus::Held)
                | (EscrowStatus::Held, EscrowStatus::Released)
                | (EscrowStatus::Held, EscrowStatus::Refunded)
        )
    }
}

impl Order {
    /// New order for `product`, in the initial state its type calls for
    pub fn open(
        id: OrderId,
        order_number: String,
        buyer_id: UserId,
        product: &Product,
        now: DateTime<Utc>,
        hold_period: Duration,
    ) -> Result<Self> {
        let (status, escrow_status, escrow_release_at) = match product.product_type {
            ProductType::Downloadable => (OrderStatus::Processing, EscrowStatus::None, None),
            ProductType::Account => {
                let release_at = now.checked_add_signed(hold_period).ok_or_else(|| {
                    Error::Config(format!("escrow hold period {} overflows", hold_period))
                })?;
                (OrderStatus::Pending, EscrowStatus::Held, Some(release_at))
            }
        };

        Ok(Self {
            id,
            order_number,
            buyer_id,
            seller_id: product.seller_id,
            product_id: product.id,
            amount: product.price,
            status,
            escrow_status,
            escrow_release_at,
            product_data: ProductSnapshot::capture(product),
            delivery_data: None,
            delivered_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Escrow held and its deadline reached
    pub fn is_due(&self, as_of: DateTime<Utc>) -> bool {
        self.escrow_status == EscrowStatus::Held
            && self.escrow_release_at.map_or(false, |at| at <= as_of)
    }

    fn not_completable(&self) -> Error {
        Error::OrderNotCompletable {
            order_number: self.order_number.clone(),
            escrow_status: self.escrow_status.to_string(),
        }
    }

    /// Move to `status`/`escrow`, rejecting any move the machine does not allow
    pub fn advance(
        &mut self,
        status: OrderStatus,
        escrow: EscrowStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let status_ok = status == self.status || self.status.can_transition_to(status);
        let escrow_ok = escrow == self.escrow_status || self.escrow_status.can_transition_to(escrow);
        if !status_ok || !escrow_ok {
            tracing::warn!(
                order_number = %self.order_number,
                from = %self.status,
                to = %status,
                escrow_from = %self.escrow_status,
                escrow_to = %escrow,
                "Rejected order transition"
            );
            return Err(self.not_completable());
        }

        self.status = status;
        self.escrow_status = escrow;
        self.updated_at = now;
        Ok(())
    }

    /// Complete an order that needs no escrow
    pub fn settle_immediately(&mut self, delivery: DeliveryData, now: DateTime<Utc>) -> Result<()> {
        if self.escrow_status != EscrowStatus::None {
            return Err(self.not_completable());
        }
        self.advance(OrderStatus::Completed, EscrowStatus::None, now)?;
        self.deliver(delivery, now);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Pay out a held escrow
    pub fn release(&mut self, delivery: Option<DeliveryData>, now: DateTime<Utc>) -> Result<()> {
        if self.escrow_status != EscrowStatus::Held {
            return Err(self.not_completable());
        }
        self.advance(OrderStatus::Completed, EscrowStatus::Released, now)?;
        if let Some(delivery) = delivery {
            self.deliver(delivery, now);
        }
        self.completed_at = Some(now);
        Ok(())
    }

    /// Return a held escrow to the buyer
    pub fn refund(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.escrow_status != EscrowStatus::Held {
            return Err(self.not_completable());
        }
        self.advance(OrderStatus::Refunded, EscrowStatus::Refunded, now)
    }

    fn deliver(&mut self, delivery: DeliveryData, now: DateTime<Utc>) {
        self.delivery_data = Some(delivery);
        self.delivered_at = Some(now);
    }
}

fn order_posting(kind: TransactionType, description: String, order: &Order) -> Posting {
    Posting::new(kind, description)
        .with_reference(LedgerRef::Order(order.id.0))
        .with_metadata("order_number", order.order_number.clone())
}

/// Release a held escrow inside `txn`: pay the seller, hand over the sealed
/// goods and drop the due-date entry.
pub(crate) fn release_in(txn: &mut LedgerTxn<'_>, record: OrderRecord) -> Result<Order> {
    let OrderRecord {
        mut order,
        sealed_delivery,
    } = record;
    let now = txn.now();
    let release_at = order.escrow_release_at;

    order.release(sealed_delivery, now)?;

    wallet::credit(
        txn,
        order.seller_id,
        order.amount,
        order_posting(
            TransactionType::Sale,
            format!("Sale of {}", order.product_data.title),
            &order,
        ),
    )?;
    wallet::release_pending(txn, order.seller_id, order.amount)?;

    if let Some(at) = release_at {
        txn.delete_index(index::escrow_due(at, order.id.0));
    }
    txn.put(&OrderRecord {
        order: order.clone(),
        sealed_delivery: None,
    })?;

    tracing::info!(
        order_number = %order.order_number,
        seller_id = %order.seller_id,
        amount = %order.amount,
        "Escrow released"
    );

    Ok(order)
}

/// Refund a held escrow inside `txn`: return the amount to the buyer and
/// discard the sealed goods.
pub(crate) fn refund_in(txn: &mut LedgerTxn<'_>, record: OrderRecord) -> Result<Order> {
    let mut order = record.order;
    let now = txn.now();
    let release_at = order.escrow_release_at;

    order.refund(now)?;

    wallet::credit(
        txn,
        order.buyer_id,
        order.amount,
        order_posting(
            TransactionType::EscrowRelease,
            format!("Refund of {}", order.product_data.title),
            &order,
        ),
    )?;
    wallet::release_pending(txn, order.seller_id, order.amount)?;

    if let Some(at) = release_at {
        txn.delete_index(index::escrow_due(at, order.id.0));
    }
    txn.put(&OrderRecord {
        order: order.clone(),
        sealed_delivery: None,
    })?;

    tracing::info!(
        order_number = %order.order_number,
        buyer_id = %order.buyer_id,
        amount = %order.amount,
        "Escrow refunded"
    );

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductId;
    use ledger_core::Money;

    fn product(product_type: ProductType) -> Product {
        Product {
            id: ProductId(1),
            seller_id: UserId(2),
            title: "Item".to_string(),
            description: String::new(),
            price: Money::from_dollars(40),
            product_type,
            download_file: Some("files/item.zip".to_string()),
            account_details: Some("login:pass".to_string()),
            stock_quantity: 1,
            sold_count: 0,
            is_active: true,
        }
    }

    fn open(product_type: ProductType) -> (Order, DateTime<Utc>) {
        let now = Utc::now();
        let order = Order::open(
            OrderId::new(),
            "ORD-ABCDEFGHIJ".to_string(),
            UserId(1),
            &product(product_type),
            now,
            Duration::days(3),
        )
        .unwrap();
        (order, now)
    }

    #[test]
    fn test_initial_states() {
        let (order, now) = open(ProductType::Downloadable);
        assert_eq!(order.status, OrderStatus::Processing);
        assert_eq!(order.escrow_status, EscrowStatus::None);
        assert!(order.escrow_release_at.is_none());

        let (order, _) = open(ProductType::Account);
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.escrow_status, EscrowStatus::Held);
        assert!(order.escrow_release_at.unwrap() >= now + Duration::days(3));
        assert!(order.delivery_data.is_none());
    }

    #[test]
    fn test_release_once() {
        let (mut order, now) = open(ProductType::Account);
        order.release(None, now).unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.escrow_status, EscrowStatus::Released);
        assert_eq!(order.completed_at, Some(now));

        let err = order.release(None, now).unwrap_err();
        assert!(matches!(err, Error::OrderNotCompletable { .. }));
        let err = order.refund(now).unwrap_err();
        assert!(matches!(err, Error::OrderNotCompletable { .. }));
    }

    #[test]
    fn test_refund_is_terminal() {
        let (mut order, now) = open(ProductType::Account);
        order.refund(now).unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(order.escrow_status, EscrowStatus::Refunded);
        assert!(order.status.is_terminal());
        assert!(order.release(None, now).is_err());
    }

    #[test]
    fn test_downloadable_cannot_be_released() {
        let (mut order, now) = open(ProductType::Downloadable);
        assert!(order.release(None, now).is_err());

        order
            .settle_immediately(
                DeliveryData::Download {
                    download_url: "files/item.zip".to_string(),
                    instructions: String::new(),
                },
                now,
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.delivered_at.is_some());
    }

    #[test]
    fn test_overflowing_hold_period_is_an_error() {
        let err = Order::open(
            OrderId::new(),
            "ORD-ABCDEFGHIJ".to_string(),
            UserId(1),
            &product(ProductType::Account),
            DateTime::<Utc>::MAX_UTC - Duration::hours(1),
            Duration::days(3),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_is_due() {
        let (order, now) = open(ProductType::Account);
        assert!(!order.is_due(now));
        assert!(order.is_due(now + Duration::days(3)));
    }

    #[test]
    fn test_transition_tables() {
        use EscrowStatus as E;
        use OrderStatus as S;

        for terminal in [S::Completed, S::Cancelled, S::Refunded] {
            for next in [
                S::Pending,
                S::Processing,
                S::Completed,
                S::Cancelled,
                S::Refunded,
                S::Disputed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }

        assert!(E::None.can_transition_to(E::Held));
        assert!(!E::Released.can_transition_to(E::Held));
        assert!(!E::Refunded.can_transition_to(E::Released));
        assert!(!E::None.can_transition_to(E::Released));
    }
}
