//! Settlement node binary
//!
//! Opens the ledger and runs the escrow sweeper until interrupted.
//! Configuration comes from the TOML file given as first argument, or from
//! the environment when none is given.

use settlement::{Config, EscrowSweeper, SettlementEngine};
use std::sync::Arc;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::from_env()?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        ledger_dir = %config.ledger_data_dir.display(),
        "Starting settlement node"
    );

    let engine = Arc::new(SettlementEngine::new(config).await?);
    let sweeper = Arc::new(EscrowSweeper::from_config(engine.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown_tx.send(true)?;
    sweeper_task.await?;
    engine.shutdown().await?;

    Ok(())
}
