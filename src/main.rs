//! Development rail for the crash round engine.
//!
//! Runs the engine against the in-memory collaborators; production
//! deployments swap those for real storage, treasury, and payout adapters
//! behind the same traits.

use clap::Parser;
use crashpoint::config::{ConfigLoader, EngineConfig};
use crashpoint::engine::RoundEngine;
use crashpoint::providers::{MemoryBankroll, MemoryPayoutGateway, MemoryStore};
use crashpoint::runner::EngineRunner;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crashpoint", about = "Provably fair crash round engine")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override the betting window length in seconds
    #[arg(long)]
    betting_window: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ConfigLoader::new().with_path(path).load()?,
        None => EngineConfig::default(),
    };
    if let Some(secs) = args.betting_window {
        config.clock.betting_window_secs = secs;
    }
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    let bankroll = Arc::new(MemoryBankroll::new(config.starting_bankroll));
    let gateway = Arc::new(MemoryPayoutGateway::new());

    let engine = Arc::new(RoundEngine::new(config, store, bankroll, gateway).await?);
    let runner = EngineRunner::spawn(engine.clone());
    info!("engine started; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    runner.stop();
    runner.join().await;
    Ok(())
}
