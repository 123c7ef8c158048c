//! Error types for the ledger

use crate::types::{Money, UserId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Debit larger than the available balance
    #[error("Insufficient funds for user {user}: required {required}, available {available}")]
    InsufficientFunds {
        /// Wallet owner
        user: UserId,
        /// Amount requested
        required: Money,
        /// Balance at the time of the request
        available: Money,
    },

    /// Negative, overflowing or non-representable amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Ledger entry not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (negative balance, ledger drift, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Other(format!("metrics: {}", err))
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
