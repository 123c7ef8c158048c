//! Secondary index keys for orders and deposits
//!
//! Time components are big-endian milliseconds so that keys sort
//! chronologically. Every key ends with the 16 bytes of the entity id.

use chrono::{DateTime, Utc};
use ledger_core::{index_key, UserId};
use uuid::Uuid;

/// user || created_at || order_id -> empty (one entry per party)
pub const ORDERS_BY_PARTY: u8 = b'o';
/// order_number -> order_id
pub const ORDER_NUMBER: u8 = b'n';
/// escrow_release_at || order_id -> empty (present while held)
pub const ESCROW_DUE: u8 = b'e';
/// user || created_at || deposit_id -> empty
pub const DEPOSITS_BY_USER: u8 = b'd';
/// expires_at || deposit_id -> empty (present while pending)
pub const DEPOSIT_EXPIRY: u8 = b'x';

const ID_LEN: usize = 16;

fn millis(at: DateTime<Utc>) -> [u8; 8] {
    (at.timestamp_millis().max(0) as u64).to_be_bytes()
}

/// Party index entry of an order
pub fn order_by_party(user: UserId, created_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    index_key(
        ORDERS_BY_PARTY,
        &[&user.to_key(), &millis(created_at), id.as_bytes()],
    )
}

/// Prefix of all party entries of `user`
pub fn orders_of(user: UserId) -> Vec<u8> {
    index_key(ORDERS_BY_PARTY, &[&user.to_key()])
}

/// Order number entry
pub fn order_number(number: &str) -> Vec<u8> {
    index_key(ORDER_NUMBER, &[number.as_bytes()])
}

/// Escrow due-date entry
pub fn escrow_due(release_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    index_key(ESCROW_DUE, &[&millis(release_at), id.as_bytes()])
}

/// Deposit entry of a user
pub fn deposit_by_user(user: UserId, created_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    index_key(
        DEPOSITS_BY_USER,
        &[&user.to_key(), &millis(created_at), id.as_bytes()],
    )
}

/// Prefix of all deposits of `user`
pub fn deposits_of(user: UserId) -> Vec<u8> {
    index_key(DEPOSITS_BY_USER, &[&user.to_key()])
}

/// Deposit expiry entry
pub fn deposit_expiry(expires_at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    index_key(DEPOSIT_EXPIRY, &[&millis(expires_at), id.as_bytes()])
}

/// `[start, end)` covering every time-keyed entry under `tag` due at or before `as_of`
pub fn due_range(tag: u8, as_of: DateTime<Utc>) -> (Vec<u8>, Vec<u8>) {
    let bound = (as_of.timestamp_millis().max(0) as u64).saturating_add(1);
    (index_key(tag, &[]), index_key(tag, &[&bound.to_be_bytes()]))
}

/// Entity id at the end of an index key
pub fn trailing_id(key: &[u8]) -> Option<Uuid> {
    let start = key.len().checked_sub(ID_LEN)?;
    Uuid::from_slice(&key[start..]).ok()
}
