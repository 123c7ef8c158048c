//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer cents for money)

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Neg;
use uuid::Uuid;

/// User identifier supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl UserId {
    /// Big-endian key bytes (sort order matches numeric order)
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monetary amount in USD cents.
///
/// Signed so that ledger entries can carry debits as negative amounts.
/// Wallet balances are kept non-negative by the wallet service.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Money = Money(0);

    /// Create from cents
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Create from whole dollars
    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    /// Amount in cents
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Exact conversion from a decimal amount; rejects sub-cent precision
    pub fn from_decimal(amount: Decimal) -> crate::Result<Self> {
        let cents = amount * Decimal::ONE_HUNDRED;
        if !cents.fract().is_zero() {
            return Err(crate::Error::InvalidAmount(format!(
                "{} has more than two decimal places",
                amount
            )));
        }

        cents
            .to_i64()
            .map(Self)
            .ok_or_else(|| crate::Error::InvalidAmount(format!("{} is out of range", amount)))
    }

    /// Decimal view with two fractional digits
    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    /// Checked addition
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// True for amounts below zero
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// True for zero
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

/// Ledger entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionType {
    /// Funds added from outside the marketplace
    Deposit = 1,
    /// Funds paid out of the marketplace
    Withdrawal = 2,
    /// Buyer debit for an order
    Purchase = 3,
    /// Seller credit for an order
    Sale = 4,
    /// Referral commission
    ReferralBonus = 5,
    /// Funds placed on hold
    EscrowHold = 6,
    /// Funds returned from a hold
    EscrowRelease = 7,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
            TransactionType::ReferralBonus => "referral_bonus",
            TransactionType::EscrowHold => "escrow_hold",
            TransactionType::EscrowRelease => "escrow_release",
        }
    }

    /// Credits of this type count towards `total_earned`
    pub fn counts_as_earnings(&self) -> bool {
        matches!(self, TransactionType::Sale | TransactionType::ReferralBonus)
    }

    /// Debits of this type count towards `total_spent`
    pub fn counts_as_spending(&self) -> bool {
        matches!(self, TransactionType::Purchase)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Awaiting an external outcome
    Pending = 1,
    /// Applied to the balance
    Completed = 2,
    /// Rejected
    Failed = 3,
    /// Withdrawn before completion
    Cancelled = 4,
}

/// What caused a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerRef {
    /// Marketplace order
    Order(Uuid),
    /// Crypto deposit request
    Deposit(Uuid),
}

impl fmt::Display for LedgerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerRef::Order(id) => write!(f, "order:{}", id),
            LedgerRef::Deposit(id) => write!(f, "deposit:{}", id),
        }
    }
}

/// Wallet (one per user)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Owner
    pub user_id: UserId,

    /// Spendable funds, never negative
    pub balance: Money,

    /// Sales still held in escrow (informational)
    pub pending_balance: Money,

    /// Cumulative sale and referral income
    pub total_earned: Money,

    /// Cumulative purchase spending
    pub total_spent: Money,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Empty wallet
    pub fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            balance: Money::ZERO,
            pending_balance: Money::ZERO,
            total_earned: Money::ZERO,
            total_spent: Money::ZERO,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Store-assigned position in the global log
    pub sequence: u64,

    /// Public identifier (`TXN-XXXXXXXXXXXX`)
    pub transaction_id: String,

    /// Wallet owner
    pub user_id: UserId,

    /// Entry type
    pub kind: TransactionType,

    /// Signed amount (negative for debits)
    pub amount: Money,

    /// Wallet balance right after this entry
    pub balance_after: Money,

    /// Human readable description
    pub description: String,

    /// Additional metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    /// Entry status
    pub status: TransactionStatus,

    /// Cause of the entry
    pub reference: Option<LedgerRef>,

    /// Append timestamp
    pub created_at: DateTime<Utc>,
}

/// What a debit or credit should record in the ledger
#[derive(Debug, Clone)]
pub struct Posting {
    /// Entry type
    pub kind: TransactionType,
    /// Description
    pub description: String,
    /// Cause
    pub reference: Option<LedgerRef>,
    /// Metadata
    pub metadata: BTreeMap<String, String>,
}

impl Posting {
    /// New posting without reference
    pub fn new(kind: TransactionType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            reference: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach the cause
    pub fn with_reference(mut self, reference: LedgerRef) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Attach a metadata pair
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Page request (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Page number, starting at 1
    pub number: u32,
    /// Items per page
    pub per_page: u32,
}

impl Page {
    /// Create a page request; zero values are clamped to 1
    pub fn new(number: u32, per_page: u32) -> Self {
        Self {
            number: number.max(1),
            per_page: per_page.max(1),
        }
    }

    /// Items to skip
    pub fn offset(&self) -> usize {
        (self.number as usize - 1) * self.per_page as usize
    }

    /// Items to return
    pub fn limit(&self) -> usize {
        self.per_page as usize
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// One page of results, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    /// Items on this page
    pub items: Vec<T>,
    /// Page number
    pub page: u32,
    /// Requested page size
    pub per_page: u32,
    /// More items exist after this page
    pub has_more: bool,
}

impl<T> Paginated<T> {
    /// Build from a `limit + 1` probe
    pub fn from_probe(mut items: Vec<T>, page: Page) -> Self {
        let has_more = items.len() > page.limit();
        items.truncate(page.limit());
        Self {
            items,
            page: page.number,
            per_page: page.per_page,
            has_more,
        }
    }

    /// Convert items, keeping page info
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            has_more: self.has_more,
        }
    }
}
