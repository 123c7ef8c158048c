//! Crypto deposit lifecycle
//!
//! Confirmation is simulated: no chain is watched. A deposit is credited at
//! most once because confirmation requires the pending status, which it
//! leaves in the same unit as the credit.

use crate::{
    config::DepositConfig,
    types::{CryptoDeposit, Cryptocurrency, DepositId, DepositStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use ledger_core::{ids, Money, UserId};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;

/// Decimal places of crypto amounts
pub const CRYPTO_SCALE: u32 = 8;

/// Prefix of simulated transaction hashes
pub const SIMULATED_HASH_PREFIX: &str = "demo-";

/// `usd / rate`, rounded to 8 decimal places
pub fn crypto_amount(usd: Decimal, rate: Decimal) -> Result<Decimal> {
    usd.checked_div(rate)
        .map(|amount| amount.round_dp(CRYPTO_SCALE))
        .ok_or_else(|| Error::InvalidAmount(format!("cannot convert {} at rate {}", usd, rate)))
}

/// Address prefixes and total length per currency
fn address_format(currency: Cryptocurrency) -> (&'static [&'static str], usize) {
    match currency {
        Cryptocurrency::Btc => (&["1", "3", "bc1"], 34),
        Cryptocurrency::Eth | Cryptocurrency::Usdt => (&["0x"], 42),
    }
}

/// Mock receiving address
pub fn mock_address(currency: Cryptocurrency) -> String {
    let (prefixes, len) = address_format(currency);
    let prefix = prefixes
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(prefixes[0]);
    format!("{}{}", prefix, ids::random_alphanumeric(len - prefix.len()))
}

/// Mock transaction hash
pub fn simulated_hash() -> String {
    format!("{}{}", SIMULATED_HASH_PREFIX, ids::random_upper(20))
}

/// Check `usd` against the configured bounds
pub fn check_bounds(usd: Decimal, config: &DepositConfig) -> Result<()> {
    if usd < config.min_usd || usd > config.max_usd {
        return Err(Error::InvalidAmount(format!(
            "deposit must be between {} and {} USD, got {}",
            config.min_usd, config.max_usd, usd
        )));
    }
    Ok(())
}

impl CryptoDeposit {
    /// New pending deposit with a frozen rate
    pub fn open(
        user_id: UserId,
        cryptocurrency: Cryptocurrency,
        usd_amount: Money,
        exchange_rate: Decimal,
        config: &DepositConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let ttl = config.ttl()?;
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::Config(format!("deposit ttl {} overflows", ttl)))?;

        Ok(Self {
            id: DepositId::new(),
            user_id,
            cryptocurrency,
            crypto_amount: crypto_amount(usd_amount.to_decimal(), exchange_rate)?,
            usd_amount,
            exchange_rate,
            wallet_address: mock_address(cryptocurrency),
            transaction_hash: None,
            confirmations: 0,
            required_confirmations: config.required_confirmations,
            status: DepositStatus::Pending,
            expires_at,
            created_at: now,
            confirmed_at: None,
        })
    }

    /// Pending and past its deadline
    pub fn is_overdue(&self, as_of: DateTime<Utc>) -> bool {
        self.status == DepositStatus::Pending && self.expires_at <= as_of
    }

    /// Mark confirmed. Rejects anything but a live pending deposit.
    pub fn confirm(
        &mut self,
        confirmations: u32,
        transaction_hash: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != DepositStatus::Pending {
            return Err(Error::AlreadyConfirmed {
                deposit_id: self.id.to_string(),
                status: self.status.to_string(),
            });
        }
        if self.expires_at <= now {
            return Err(Error::DepositExpired(self.id.to_string()));
        }

        self.status = DepositStatus::Confirmed;
        self.confirmations = confirmations;
        self.transaction_hash = Some(transaction_hash);
        self.confirmed_at = Some(now);
        Ok(())
    }

    /// Mark expired. Only pending deposits expire.
    pub fn expire(&mut self) -> bool {
        if self.status != DepositStatus::Pending {
            return false;
        }
        self.status = DepositStatus::Expired;
        true
    }
}
