//! scooter-devnet CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use scooter_node::devnet::Devnet;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let manifest = cli.manifest.clone();
    let config = cli.into_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("scooter-devnet v{}", env!("CARGO_PKG_VERSION"));

    let mut devnet = Devnet::new(config).await?;
    let outcome = devnet.run().await;
    devnet.shutdown().await?;
    let report = outcome?;

    let json = serde_json::to_string_pretty(&report)?;
    if let Some(path) = manifest {
        tokio::fs::write(&path, &json).await?;
        info!("Wrote report to {}", path.display());
    } else {
        println!("{json}");
    }

    info!("Completed {} rentals", report.rides.len());
    Ok(())
}
