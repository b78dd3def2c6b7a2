//! Basalt node daemon.
//!
//! This is the main entry point for the basalt-node binary.

use anyhow::Result;
use basalt_node::config::NodeConfig;
use basalt_node::node::Node;
use basalt_node::Args;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Basalt node v{}", env!("CARGO_PKG_VERSION"));

    let config = NodeConfig::load(&args.config, &args)?;
    info!("Network: {}", config.network);
    info!("P2P: {}", config.network_config.bind_address);

    let (node, events_tx, mut outbound_rx) = Node::new(config);

    // The transport feeds `events_tx` and drains outbound messages; until
    // one is attached, just log what the sync layer wants to send.
    tokio::spawn(async move {
        while let Some((peer, message)) = outbound_rx.recv().await {
            tracing::trace!(peer = %peer, ?message, "outbound message");
        }
    });

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!("Node error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    drop(events_tx);
    info!("Basalt node stopped");
    Ok(())
}
