//! `spider-tunnel` server binary.
//!
//! Logging follows `RUST_LOG`, defaulting to `info`.

// ============================================================================
// Imports
// ============================================================================

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use spider_tunnel::{Result, Tunnel, TunnelConfig};

// ============================================================================
// Args
// ============================================================================

/// WebSocket tunnel multiplexing many peers over one host connection.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Path hosts connect to; peers append `/{hex key}`.
    #[arg(long, default_value = spider_tunnel::config::DEFAULT_ROUTE_PREFIX)]
    route_prefix: String,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = TunnelConfig::default().with_route_prefix(args.route_prefix);
    let tunnel = Tunnel::bind(args.addr.as_str(), config).await?;

    info!(url = %tunnel.host_url(), "Waiting for hosts");

    tokio::signal::ctrl_c().await?;
    tunnel.shutdown().await;

    Ok(())
}
