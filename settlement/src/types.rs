//! Core types for the settlement engine

use chrono::{DateTime, Utc};
use ledger_core::{Collection, Money, Record, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Role supplied by the identity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Marketplace operator
    Admin,
    /// Lists products
    Seller,
    /// Buys products
    Buyer,
}

/// Authenticated caller of a core operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// User id
    pub user_id: UserId,
    /// Role
    pub role: Role,
}

impl Actor {
    /// Create new actor
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Buyer with the given id
    pub fn buyer(id: u64) -> Self {
        Self::new(UserId(id), Role::Buyer)
    }

    /// Seller with the given id
    pub fn seller(id: u64) -> Self {
        Self::new(UserId(id), Role::Seller)
    }

    /// Admin with the given id
    pub fn admin(id: u64) -> Self {
        Self::new(UserId(id), Role::Admin)
    }

    /// Admin role
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Product identifier assigned by the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a product is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductType {
    /// File download, settled immediately
    Downloadable,
    /// Account credentials, settled through escrow
    Account,
}

impl ProductType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::Downloadable => "downloadable",
            ProductType::Account => "account",
        }
    }
}

/// Catalog product mirrored into the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: ProductId,
    /// Listing owner
    pub seller_id: UserId,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Current price
    pub price: Money,
    /// Delivery kind
    pub product_type: ProductType,
    /// Download reference (downloadable products)
    pub download_file: Option<String>,
    /// Account credentials (account products)
    pub account_details: Option<String>,
    /// Units left
    pub stock_quantity: u32,
    /// Units sold
    pub sold_count: u32,
    /// Listed for sale
    pub is_active: bool,
}

impl Record for Product {
    const COLLECTION: Collection = Collection::Products;

    fn record_key(&self) -> Vec<u8> {
        self.id.0.to_be_bytes().to_vec()
    }
}

/// Whitelisted copy of a product taken at purchase time.
///
/// Never carries the download reference or account credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Product id
    pub id: ProductId,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Price paid
    pub price: Money,
    /// Delivery kind
    pub product_type: ProductType,
    /// Seller
    pub seller_id: UserId,
}

impl ProductSnapshot {
    /// Copy the public fields of `product`
    pub fn capture(product: &Product) -> Self {
        Self {
            id: product.id,
            title: product.title.clone(),
            description: product.description.clone(),
            price: product.price,
            product_type: product.product_type,
            seller_id: product.seller_id,
        }
    }
}

/// Order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Fresh time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Awaiting escrow resolution
    Pending,
    /// Settlement in progress
    Processing,
    /// Seller paid
    Completed,
    /// Cancelled
    Cancelled,
    /// Buyer refunded
    Refunded,
    /// Reserved, nothing drives it
    Disputed,
}

impl OrderStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escrow status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowStatus {
    /// No escrow
    None,
    /// Buyer debited, seller not yet credited
    Held,
    /// Paid out to the seller
    Released,
    /// Returned to the buyer
    Refunded,
}

impl EscrowStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::None => "none",
            EscrowStatus::Held => "held",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Goods handed to the buyer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryData {
    /// Downloadable file
    Download {
        /// Download reference
        download_url: String,
        /// Buyer instructions
        instructions: String,
    },
    /// Account credentials
    Account {
        /// Credentials
        account_details: String,
        /// Buyer instructions
        instructions: String,
    },
}

impl DeliveryData {
    /// Download reference, if this is a file delivery
    pub fn download_url(&self) -> Option<&str> {
        match self {
            DeliveryData::Download { download_url, .. } => Some(download_url),
            DeliveryData::Account { .. } => None,
        }
    }

    /// Credentials, if this is an account delivery
    pub fn account_details(&self) -> Option<&str> {
        match self {
            DeliveryData::Account {
                account_details, ..
            } => Some(account_details),
            DeliveryData::Download { .. } => None,
        }
    }
}

/// One purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Internal id
    pub id: OrderId,
    /// Public order number (`ORD-` + 10)
    pub order_number: String,
    /// Buyer
    pub buyer_id: UserId,
    /// Seller
    pub seller_id: UserId,
    /// Product bought
    pub product_id: ProductId,
    /// Price at purchase time
    pub amount: Money,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Escrow status
    pub escrow_status: EscrowStatus,
    /// Automatic release deadline
    pub escrow_release_at: Option<DateTime<Utc>>,
    /// Product snapshot
    pub product_data: ProductSnapshot,
    /// Goods handed over
    pub delivery_data: Option<DeliveryData>,
    /// When goods were handed over
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the seller was paid
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Buyer or seller of this order
    pub fn is_party(&self, user: UserId) -> bool {
        self.buyer_id == user || self.seller_id == user
    }
}

/// Stored form of an order: the order plus goods sealed until settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct OrderRecord {
    pub(crate) order: Order,
    pub(crate) sealed_delivery: Option<DeliveryData>,
}

impl Record for OrderRecord {
    const COLLECTION: Collection = Collection::Orders;

    fn record_key(&self) -> Vec<u8> {
        self.order.id.0.as_bytes().to_vec()
    }
}

/// Supported cryptocurrencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cryptocurrency {
    /// Bitcoin
    Btc,
    /// Ether
    Eth,
    /// Tether
    Usdt,
}

impl Cryptocurrency {
    /// Ticker
    pub fn as_str(&self) -> &'static str {
        match self {
            Cryptocurrency::Btc => "BTC",
            Cryptocurrency::Eth => "ETH",
            Cryptocurrency::Usdt => "USDT",
        }
    }
}

impl fmt::Display for Cryptocurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cryptocurrency {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Cryptocurrency::Btc),
            "ETH" => Ok(Cryptocurrency::Eth),
            "USDT" => Ok(Cryptocurrency::Usdt),
            _ => Err(crate::Error::UnsupportedCurrency(s.to_string())),
        }
    }
}

/// Deposit identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepositId(pub Uuid);

impl DepositId {
    /// Fresh time-ordered id
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for DepositId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deposit lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepositStatus {
    /// Waiting for funds
    Pending,
    /// Funds credited
    Confirmed,
    /// Rejected
    Failed,
    /// Deadline passed
    Expired,
}

impl DepositStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Failed => "failed",
            DepositStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crypto funding request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoDeposit {
    /// Internal id
    pub id: DepositId,
    /// Depositor
    pub user_id: UserId,
    /// Currency sent
    pub cryptocurrency: Cryptocurrency,
    /// Amount of crypto expected (8 dp)
    pub crypto_amount: Decimal,
    /// Amount credited on confirmation
    pub usd_amount: Money,
    /// USD per unit, frozen at creation
    pub exchange_rate: Decimal,
    /// Address funds are sent to
    pub wallet_address: String,
    /// Transaction hash, set on confirmation
    pub transaction_hash: Option<String>,
    /// Confirmations seen
    pub confirmations: u32,
    /// Confirmations needed
    pub required_confirmations: u32,
    /// Lifecycle status
    pub status: DepositStatus,
    /// Confirmation deadline
    pub expires_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Confirmation time
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Record for CryptoDeposit {
    const COLLECTION: Collection = Collection::Deposits;

    fn record_key(&self) -> Vec<u8> {
        self.id.0.as_bytes().to_vec()
    }
}

/// Outcome of an escrow sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Due orders examined
    pub examined: usize,
    /// Order numbers released
    pub released: Vec<String>,
    /// Orders already resolved by someone else
    pub skipped: usize,
}
