//! Exchange-rate collaborator

use crate::{config::RateConfig, types::Cryptocurrency, Error, Result};
use rust_decimal::Decimal;

/// Source of USD rates for supported cryptocurrencies
pub trait ExchangeRates: Send + Sync + std::fmt::Debug {
    /// USD price of one unit of `currency`
    fn usd_rate(&self, currency: Cryptocurrency) -> Result<Decimal>;
}

/// Fixed rate table
#[derive(Debug, Clone)]
pub struct StaticRates {
    btc_usd: Decimal,
    eth_usd: Decimal,
    usdt_usd: Decimal,
}

impl StaticRates {
    /// Table from configuration
    pub fn from_config(config: &RateConfig) -> Self {
        Self {
            btc_usd: config.btc_usd,
            eth_usd: config.eth_usd,
            usdt_usd: config.usdt_usd,
        }
    }
}

impl Default for StaticRates {
    fn default() -> Self {
        Self::from_config(&RateConfig::default())
    }
}

impl ExchangeRates for StaticRates {
    fn usd_rate(&self, currency: Cryptocurrency) -> Result<Decimal> {
        let rate = match currency {
            Cryptocurrency::Btc => self.btc_usd,
            Cryptocurrency::Eth => self.eth_usd,
            Cryptocurrency::Usdt => self.usdt_usd,
        };

        if rate <= Decimal::ZERO {
            return Err(Error::UnsupportedCurrency(format!(
                "{} has no usable rate ({})",
                currency, rate
            )));
        }
        Ok(rate)
    }
}
