//! # Tangle Gossip Node
//!
//! Runs the gossip layer against an in-memory tangle.
//!
//! ## Startup Sequence
//!
//! 1. Initialise logging (`RUST_LOG`, default `info`)
//! 2. Load configuration (`TANGLE_GOSSIP_CONFIG`, `TANGLE_GOSSIP_PORT`)
//! 3. Start the gossip node
//! 4. Wait for Ctrl+C, then shut down gracefully

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use node_runtime::{load_config, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, PORT_ENV};
use tangle_gossip::adapters::InMemoryTangle;
use tangle_gossip::{GossipNode, NodePorts};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let path = std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let port_override = std::env::var(PORT_ENV).ok();
    let config = load_config(&path, port_override.as_deref())?;

    info!("===========================================");
    info!("  Tangle Gossip Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(
        neighbors = config.neighbors.len(),
        max_neighbors = config.max_neighbors,
        auto_tethering = config.auto_tethering,
        "configuration"
    );

    let tangle = Arc::new(InMemoryTangle::new());
    let node = GossipNode::start(config, NodePorts::from_single(tangle))
        .await
        .context("failed to start gossip node")?;
    info!(local_addr = %node.local_addr(), "node running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;

    Ok(())
}
