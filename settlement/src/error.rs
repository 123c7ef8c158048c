//! Error types for the settlement engine

use ledger_core::{Money, UserId};
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Buyer balance below the price
    #[error("Insufficient funds for user {user}: required {required}, available {available}")]
    InsufficientFunds {
        /// Wallet owner
        user: UserId,
        /// Amount requested
        required: Money,
        /// Balance at the time of the request
        available: Money,
    },

    /// Product has no stock left
    #[error("Product {0} is out of stock")]
    OutOfStock(String),

    /// Escrow is not in a state that allows the action
    #[error("Order {order_number} cannot be completed (escrow {escrow_status})")]
    OrderNotCompletable {
        /// Order number
        order_number: String,
        /// Escrow status observed
        escrow_status: String,
    },

    /// Deposit already left the pending state
    #[error("Deposit {deposit_id} cannot be confirmed (status {status})")]
    AlreadyConfirmed {
        /// Deposit id
        deposit_id: String,
        /// Status observed
        status: String,
    },

    /// Deposit confirmation deadline passed
    #[error("Deposit {0} has expired")]
    DepositExpired(String),

    /// Unknown order, deposit or product
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Identifier looked up
        id: String,
    },

    /// Actor may not perform the action
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Amount outside accepted bounds
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Catalog entry missing what its type needs for delivery
    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    /// Cryptocurrency without an exchange rate
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(ledger_core::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::InsufficientFunds {
                user,
                required,
                available,
            } => Error::InsufficientFunds {
                user,
                required,
                available,
            },
            ledger_core::Error::InvalidAmount(msg) => Error::InvalidAmount(msg),
            other => Error::Ledger(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_is_lifted() {
        let err: Error = ledger_core::Error::InsufficientFunds {
            user: UserId(1),
            required: Money::from_dollars(40),
            available: Money::from_dollars(10),
        }
        .into();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
    }

    #[test]
    fn test_other_ledger_errors_are_wrapped() {
        let err: Error = ledger_core::Error::Concurrency("closed".to_string()).into();
        assert!(matches!(err, Error::Ledger(ledger_core::Error::Concurrency(_))));
        assert!(err.to_string().contains("closed"));
    }
}
