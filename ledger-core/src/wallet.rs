//! Wallet service
//!
//! The only writer of wallet balances. Every debit and credit stages the
//! balance mutation and its ledger entry in the same unit, so the entry's
//! `balance_after` is exactly the balance the unit commits.

use crate::{
    error::{Error, Result},
    txn::LedgerTxn,
    types::{Money, Posting, UserId, Wallet},
};

fn ensure_non_negative(amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(Error::InvalidAmount(format!(
            "amount must not be negative, got {}",
            amount
        )));
    }
    Ok(())
}

fn overflow(user: UserId) -> Error {
    Error::InvalidAmount(format!("wallet of user {} would overflow", user))
}

/// Get-or-create the user's wallet
pub fn get_or_create(txn: &mut LedgerTxn<'_>, user: UserId) -> Result<Wallet> {
    txn.wallet(user)
}

/// Remove `amount` from the balance and record it.
///
/// Fails with [`Error::InsufficientFunds`] when the balance is smaller than
/// `amount`; nothing is staged in that case.
pub fn debit(
    txn: &mut LedgerTxn<'_>,
    user: UserId,
    amount: Money,
    posting: Posting,
) -> Result<Wallet> {
    ensure_non_negative(amount)?;
    let mut wallet = txn.wallet(user)?;

    if wallet.balance < amount {
        return Err(Error::InsufficientFunds {
            user,
            required: amount,
            available: wallet.balance,
        });
    }

    wallet.balance = wallet
        .balance
        .checked_sub(amount)
        .ok_or_else(|| overflow(user))?;
    if posting.kind.counts_as_spending() {
        wallet.total_spent = wallet
            .total_spent
            .checked_add(amount)
            .ok_or_else(|| overflow(user))?;
    }
    wallet.updated_at = txn.now();

    let entry = txn.append(user, -amount, wallet.balance, posting)?;
    txn.stage_wallet(wallet.clone());

    tracing::debug!(
        user_id = %user,
        amount = %amount,
        balance = %wallet.balance,
        transaction_id = %entry.transaction_id,
        "Wallet debited"
    );

    Ok(wallet)
}

/// Add `amount` to the balance and record it
pub fn credit(
    txn: &mut LedgerTxn<'_>,
    user: UserId,
    amount: Money,
    posting: Posting,
) -> Result<Wallet> {
    ensure_non_negative(amount)?;
    let mut wallet = txn.wallet(user)?;

    wallet.balance = wallet
        .balance
        .checked_add(amount)
        .ok_or_else(|| overflow(user))?;
    if posting.kind.counts_as_earnings() {
        wallet.total_earned = wallet
            .total_earned
            .checked_add(amount)
            .ok_or_else(|| overflow(user))?;
    }
    wallet.updated_at = txn.now();

    let entry = txn.append(user, amount, wallet.balance, posting)?;
    txn.stage_wallet(wallet.clone());

    tracing::debug!(
        user_id = %user,
        amount = %amount,
        balance = %wallet.balance,
        transaction_id = %entry.transaction_id,
        "Wallet credited"
    );

    Ok(wallet)
}

/// Raise the informational escrow counter. No ledger entry: the funds
/// are not spendable and the order carries the hold.
pub fn hold_pending(txn: &mut LedgerTxn<'_>, user: UserId, amount: Money) -> Result<Wallet> {
    ensure_non_negative(amount)?;
    let mut wallet = txn.wallet(user)?;
    wallet.pending_balance = wallet
        .pending_balance
        .checked_add(amount)
        .ok_or_else(|| overflow(user))?;
    wallet.updated_at = txn.now();
    txn.stage_wallet(wallet.clone());
    Ok(wallet)
}

/// Lower the informational escrow counter, saturating at zero
pub fn release_pending(txn: &mut LedgerTxn<'_>, user: UserId, amount: Money) -> Result<Wallet> {
    ensure_non_negative(amount)?;
    let mut wallet = txn.wallet(user)?;
    wallet.pending_balance = wallet
        .pending_balance
        .checked_sub(amount)
        .filter(|pending| !pending.is_negative())
        .unwrap_or(Money::ZERO);
    wallet.updated_at = txn.now();
    txn.stage_wallet(wallet.clone());
    Ok(wallet)
}
