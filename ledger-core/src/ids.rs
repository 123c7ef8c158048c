//! Public identifier generation
//!
//! `TXN-` and `ORD-` identifiers are random uppercase alphanumerics.
//! Uniqueness is enforced by the store (see [`crate::LedgerTxn::unique_identifier`]),
//! which regenerates on collision.

use rand::distributions::Alphanumeric;
use rand::Rng;

const UPPER_ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Prefix of ledger entry identifiers
pub const TRANSACTION_PREFIX: &str = "TXN-";

/// Prefix of order numbers
pub const ORDER_PREFIX: &str = "ORD-";

/// Random string over `[A-Z0-9]`
pub fn random_upper(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| UPPER_ALPHANUMERIC[rng.gen_range(0..UPPER_ALPHANUMERIC.len())] as char)
        .collect()
}

/// Random string over `[A-Za-z0-9]`
pub fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// `TXN-` followed by 12 uppercase alphanumerics
pub fn transaction_id() -> String {
    format!("{}{}", TRANSACTION_PREFIX, random_upper(12))
}

/// `ORD-` followed by 10 uppercase alphanumerics
pub fn order_number() -> String {
    format!("{}{}", ORDER_PREFIX, random_upper(10))
}

fn has_format(value: &str, prefix: &str, len: usize) -> bool {
    value
        .strip_prefix(prefix)
        .map(|rest| rest.len() == len && rest.bytes().all(|b| UPPER_ALPHANUMERIC.contains(&b)))
        .unwrap_or(false)
}

/// Check the `TXN-` format
pub fn is_transaction_id(value: &str) -> bool {
    has_format(value, TRANSACTION_PREFIX, 12)
}

/// Check the `ORD-` format
pub fn is_order_number(value: &str) -> bool {
    has_format(value, ORDER_PREFIX, 10)
}
