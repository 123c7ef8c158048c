//! Marketplace settlement
//!
//! Turns marketplace actions into ledger units: purchases, escrow release
//! and refund, crypto deposits, and the sweeps that resolve whatever a user
//! never acted on.
//!
//! # Architecture
//!
//! Every operation that moves money runs as one closure on the ledger's
//! single writer, so the checks it makes (stock, balance, escrow state,
//! deposit status) and the writes it stages see the same state:
//!
//! 1. **Purchase**: debit buyer, move stock, then either pay the seller at
//!    once (downloadable) or hold the amount in escrow (account)
//! 2. **Escrow**: release to the seller or refund to the buyer, at most once
//! 3. **Deposits**: open at a frozen rate, confirm once, or expire
//! 4. **Sweeps**: release due escrows and expire overdue deposits
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Actor, Config, ProductId, SettlementEngine};
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let engine = SettlementEngine::new(Config::default()).await?;
//!
//!     let order = engine.purchase(Actor::buyer(1), ProductId(7)).await?;
//!     println!("{} is {}", order.order_number, order.status);
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod index;
pub mod escrow;
pub mod deposit;
pub mod rates;
pub mod error;
pub mod config;
pub mod engine;
pub mod scheduler;

// Re-exports
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use engine::{SettlementEngine, WalletSnapshot};
pub use rates::{ExchangeRates, StaticRates};
pub use scheduler::{EscrowSweeper, SweepOutcome};
