//! Ledger service binary

use ledger_core::{Config, Ledger};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting WokoPay Ledger Server");

    // Load configuration
    let config = Config::from_env()?;

    // Open ledger; the request layer mounts on top of this handle
    let _ledger = Ledger::open(config).await?;
    tracing::info!("Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    Ok(())
}
