//! Periodic escrow and deposit sweeper
//!
//! Every tick releases due escrows and expires overdue deposits. Both sweeps
//! are idempotent, so a tick that fails is simply retried on the next one.

use crate::{config::Config, engine::SettlementEngine, types::SweepReport, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of one sweeper tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Escrow sweep
    pub escrow: SweepReport,
    /// Deposits moved to expired
    pub expired_deposits: usize,
}

/// Background sweeper
#[derive(Debug)]
pub struct EscrowSweeper {
    engine: Arc<SettlementEngine>,
    interval: Duration,
}

impl EscrowSweeper {
    /// Sweeper ticking every `interval`
    pub fn new(engine: Arc<SettlementEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Sweeper using the engine's configured interval
    pub fn from_config(engine: Arc<SettlementEngine>) -> Self {
        let interval = sweep_interval(engine.config());
        Self::new(engine, interval)
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run both sweeps once as of `as_of`
    pub async fn run_once(&self, as_of: DateTime<Utc>) -> Result<SweepOutcome> {
        let escrow = self.engine.sweep_expired_escrows(as_of).await?;
        let expired_deposits = self.engine.expire_deposits(as_of).await?;

        debug!(
            examined = escrow.examined,
            released = escrow.released.len(),
            expired_deposits,
            "Sweep finished"
        );

        Ok(SweepOutcome {
            escrow,
            expired_deposits,
        })
    }

    /// Tick until `shutdown` turns true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting escrow sweeper");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        warn!("Sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Escrow sweeper stopped");
    }
}

fn sweep_interval(config: &Config) -> Duration {
    Duration::from_secs(config.escrow.sweep_interval_secs.max(1))
}
