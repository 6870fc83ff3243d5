//! Fee-burn watcher binary
//!
//! Follows the head of the chain, ingests every block's fee burn into
//! the store and the in-memory aggregators, and keeps the derived-stats
//! snapshot current through reorgs.

use anyhow::{Context, Result};
use clap::Parser;
use pyre::config::Config;
use pyre::prices::HttpPriceSource;
use pyre::rpc::{run_head_poller, RpcClient};
use pyre::store::RocksBlockStore;
use pyre::watcher::Watcher;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Fee-burn watcher
#[derive(Parser)]
#[command(name = "watcher")]
#[command(about = "Watch Ethereum blocks and aggregate burned fees")]
struct Args {
    /// RPC endpoint URL
    #[arg(short, long, default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// ETH/USD price quote URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080/eth-price")]
    price_url: String,

    /// Path to RocksDB database directory
    #[arg(short, long, default_value = "./burn_db")]
    db_path: PathBuf,

    /// Seconds between head polls
    #[arg(long)]
    poll_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    info!("Starting fee-burn watcher");
    info!("RPC URL: {}", args.rpc_url);
    info!("Price URL: {}", args.price_url);
    info!("Database: {:?}", args.db_path);

    let mut config = Config::default();
    if let Some(poll_interval) = args.poll_interval {
        config.poll_interval_secs = poll_interval;
    }

    let node = RpcClient::new(args.rpc_url.clone());
    let prices = HttpPriceSource::new(args.price_url);
    let store = RocksBlockStore::open(&args.db_path)
        .with_context(|| format!("Failed to open database at {:?}", args.db_path))?;

    let (events, _) = broadcast::channel(256);
    let mut watcher = Watcher::new(node, prices, store, config.clone(), events);
    watcher
        .init_from_store()
        .context("Failed to rebuild aggregation state")?;

    let (heads_tx, heads_rx) = mpsc::channel(256);
    let poller_node = RpcClient::new(args.rpc_url);
    let poll_interval = Duration::from_secs(config.poll_interval_secs);
    let poller = tokio::spawn(async move {
        run_head_poller(&poller_node, heads_tx, poll_interval).await
    });

    tokio::select! {
        result = watcher.run(heads_rx) => {
            result.context("Watcher error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    poller.abort();
    info!("Watcher stopped");
    Ok(())
}
