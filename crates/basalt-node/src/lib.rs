//! # basalt-node
//!
//! Daemon wiring for the Basalt node: configuration, the transport event
//! seam, message dispatch, and the sync scheduler tick. The transport
//! itself attaches through [`node::PeerEvent`] and the outbound message
//! channel.

pub mod config;
pub mod node;

use clap::Parser;
use std::path::PathBuf;

/// Basalt blockchain node.
#[derive(Parser, Debug)]
#[command(name = "basalt-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "basalt-node.toml")]
    pub config: PathBuf,

    /// Network to connect to
    #[arg(short, long, default_value = "mainnet")]
    pub network: String,

    /// P2P bind address
    #[arg(long)]
    pub p2p_bind: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
