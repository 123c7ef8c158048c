//! Configuration for the settlement engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Ledger data directory
    pub ledger_data_dir: PathBuf,

    /// Ledger tuning (its `data_dir` is replaced by `ledger_data_dir`)
    pub ledger: ledger_core::Config,

    /// Escrow configuration
    pub escrow: EscrowConfig,

    /// Crypto deposit configuration
    pub deposits: DepositConfig,

    /// Static exchange rate table
    pub rates: RateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "settlement-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            ledger_data_dir: PathBuf::from("./data/ledger"),
            ledger: ledger_core::Config::default(),
            escrow: EscrowConfig::default(),
            deposits: DepositConfig::default(),
            rates: RateConfig::default(),
        }
    }
}

/// Escrow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Hold period before automatic release (default: 72h = 3 days)
    pub hold_period_hours: u64,

    /// Sweep interval in seconds
    pub sweep_interval_secs: u64,

    /// Maximum orders released per sweep
    pub sweep_batch_size: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_period_hours: 72,
            sweep_interval_secs: 60,
            sweep_batch_size: 500,
        }
    }
}

/// Longest accepted escrow hold (one year)
pub const MAX_HOLD_PERIOD_HOURS: u64 = 24 * 365;

/// Longest accepted deposit time-to-live (one week)
pub const MAX_DEPOSIT_TTL_MINUTES: u64 = 60 * 24 * 7;

impl EscrowConfig {
    /// Hold period as a duration
    pub fn hold_period(&self) -> crate::Result<chrono::Duration> {
        bounded_duration(
            "escrow.hold_period_hours",
            self.hold_period_hours,
            MAX_HOLD_PERIOD_HOURS,
            chrono::Duration::try_hours,
        )
    }
}

/// Crypto deposit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepositConfig {
    /// Smallest accepted deposit in USD
    pub min_usd: Decimal,

    /// Largest accepted deposit in USD
    pub max_usd: Decimal,

    /// Minutes until a pending deposit expires
    pub ttl_minutes: u64,

    /// Confirmations a deposit asks for
    pub required_confirmations: u32,

    /// Confirmations recorded by the simulated confirmation
    pub simulated_confirmations: u32,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            min_usd: Decimal::new(1000, 2),
            max_usd: Decimal::new(1_000_000, 2),
            ttl_minutes: 120,
            required_confirmations: 3,
            simulated_confirmations: 6,
        }
    }
}

impl DepositConfig {
    /// Time-to-live as a duration
    pub fn ttl(&self) -> crate::Result<chrono::Duration> {
        bounded_duration(
            "deposits.ttl_minutes",
            self.ttl_minutes,
            MAX_DEPOSIT_TTL_MINUTES,
            chrono::Duration::try_minutes,
        )
    }
}

/// USD price of one unit of each supported cryptocurrency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// BTC/USD
    pub btc_usd: Decimal,

    /// ETH/USD
    pub eth_usd: Decimal,

    /// USDT/USD
    pub usdt_usd: Decimal,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            btc_usd: Decimal::from(45_000),
            eth_usd: Decimal::from(3_000),
            usdt_usd: Decimal::ONE,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.ledger = ledger_core::Config::from_env()?;

        if let Ok(dir) = std::env::var("SETTLEMENT_LEDGER_DIR") {
            config.ledger_data_dir = PathBuf::from(dir);
        }

        if let Ok(hours) = std::env::var("SETTLEMENT_ESCROW_HOLD_HOURS") {
            config.escrow.hold_period_hours = parse_env("SETTLEMENT_ESCROW_HOLD_HOURS", &hours)?;
        }

        if let Ok(secs) = std::env::var("SETTLEMENT_SWEEP_INTERVAL_SECS") {
            config.escrow.sweep_interval_secs = parse_env("SETTLEMENT_SWEEP_INTERVAL_SECS", &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Ledger configuration rooted at `ledger_data_dir`
    pub fn ledger_config(&self) -> ledger_core::Config {
        ledger_core::Config {
            data_dir: self.ledger_data_dir.clone(),
            ..self.ledger.clone()
        }
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.deposits.min_usd <= Decimal::ZERO || self.deposits.min_usd > self.deposits.max_usd {
            return Err(crate::Error::Config(format!(
                "deposit bounds [{}, {}] are invalid",
                self.deposits.min_usd, self.deposits.max_usd
            )));
        }

        for (name, rate) in [
            ("btc_usd", self.rates.btc_usd),
            ("eth_usd", self.rates.eth_usd),
            ("usdt_usd", self.rates.usdt_usd),
        ] {
            if rate <= Decimal::ZERO {
                return Err(crate::Error::Config(format!("rate {} must be positive", name)));
            }
        }

        self.escrow.hold_period()?;
        self.deposits.ttl()?;

        if self.escrow.sweep_interval_secs == 0 {
            return Err(crate::Error::Config("sweep interval must be non-zero".to_string()));
        }

        Ok(())
    }
}

/// `value` units as a duration, rejecting zero and anything above `max`
fn bounded_duration(
    name: &str,
    value: u64,
    max: u64,
    to_duration: fn(i64) -> Option<chrono::Duration>,
) -> crate::Result<chrono::Duration> {
    if value == 0 || value > max {
        return Err(crate::Error::Config(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )));
    }

    i64::try_from(value)
        .ok()
        .and_then(to_duration)
        .ok_or_else(|| crate::Error::Config(format!("{} is out of range: {}", name, value)))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| crate::Error::Config(format!("Invalid {} '{}': {}", name, value, e)))
}
