//! Hive daemon entry point.
//!
//! Runs one app-less hive node: it serves data and control connections,
//! hosts detached bees started over the control path, and participates
//! in the cluster topology. Application handlers live in processes that
//! embed [`hive::Hive`] directly.

use anyhow::{Context, Result};
use clap::Parser;
use hive::{Hive, HiveConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run one hive node", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, host:port
    #[arg(short, long)]
    addr: Option<String>,

    /// Log filter in tracing-subscriber EnvFilter syntax
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => tracing_subscriber::EnvFilter::new(directives),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "hive=info,hived=info,warn".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting hive daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => HiveConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => HiveConfig::default(),
    };
    if let Some(addr) = args.addr {
        config.addr = addr;
    }

    let mut hive = Hive::new(config).context("invalid hive configuration")?;
    hive.start().await.context("failed to start hive")?;
    info!(hive = %hive.id(), "serving data and control connections");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("shutdown signal received");
        }
        _ = hive.wait() => {
            warn!("hive stopped on its own");
        }
    }

    hive.stop().await.context("failed to stop hive")?;
    info!("👋 Hive stopped cleanly");
    Ok(())
}
