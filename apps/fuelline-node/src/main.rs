//! # Fuelline Node
//!
//! Runs one tier of the fuel price network.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        fuelline-node                                    │
//! │                                                                         │
//! │  hub   ───► HubServer  (:65432) ───► sales ledger (SQLite)              │
//! │               ▲   │                                                     │
//! │               │   ▼ base prices                                         │
//! │  relay ───► RelayNode  (:65433) ───► outbox (SQLite)                    │
//! │               ▲   │                                                     │
//! │               │   ▼ final prices                                        │
//! │  leaf  ───► LeafNode               simulated sales                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! fuelline-node hub
//! fuelline-node relay --id relay-north --port 65433
//! fuelline-node leaf  --id pump-1 --relay-port 65433
//! ```

mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fuelline_db::{Database, DbConfig};
use fuelline_sync::{
    HubConfig, HubServer, LeafConfig, LeafNode, NodeConfig, NodeRole, RelayConfig, RelayNode,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How often relays and leaves log their status line.
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// CLI
// =============================================================================

#[derive(Debug, Parser)]
#[command(name = "fuelline-node", version, about = "Fuel price propagation node")]
struct Cli {
    #[command(subcommand)]
    role: RoleCommand,
}

#[derive(Debug, Subcommand)]
enum RoleCommand {
    /// Central node: sets base prices and keeps the sales ledger.
    Hub {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Regional node: applies the margin and forwards sales to the hub.
    Relay {
        #[arg(long)]
        id: String,
        /// Port leaves connect to.
        #[arg(long)]
        port: u16,
        /// Hub address, `host:port`.
        #[arg(long)]
        hub: Option<String>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Sale point: receives prices and reports simulated sales.
    Leaf {
        #[arg(long)]
        id: String,
        #[arg(long)]
        relay_port: u16,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl RoleCommand {
    fn role(&self) -> NodeRole {
        match self {
            RoleCommand::Hub { .. } => NodeRole::Hub,
            RoleCommand::Relay { .. } => NodeRole::Relay,
            RoleCommand::Leaf { .. } => NodeRole::Leaf,
        }
    }

    fn config_path(&self) -> Option<PathBuf> {
        match self {
            RoleCommand::Hub { config }
            | RoleCommand::Relay { config, .. }
            | RoleCommand::Leaf { config, .. } => config.clone(),
        }
    }

    /// Command line flags win over file and environment.
    fn apply_to(&self, config: &mut NodeConfig) {
        match self {
            RoleCommand::Hub { .. } => {}
            RoleCommand::Relay { id, port, hub, .. } => {
                config.node.id = id.clone();
                config.relay.bind_addr = with_port(&config.relay.bind_addr, *port);
                if let Some(hub) = hub {
                    config.relay.hub_addr = hub.clone();
                }
            }
            RoleCommand::Leaf { id, relay_port, .. } => {
                config.node.id = id.clone();
                config.leaf.relay_addr = with_port(&config.leaf.relay_addr, *relay_port);
            }
        }
    }
}

/// Replaces the port of a `host:port` address, keeping the host.
fn with_port(addr: &str, port: u16) -> String {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    format!("{}:{}", host, port)
}

// =============================================================================
// Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let role = cli.role.role();

    let mut config = NodeConfig::load(cli.role.config_path())
        .context("Failed to load node configuration")?;
    cli.role.apply_to(&mut config);
    config.validate().context("Invalid node configuration")?;

    info!(%role, node_id = %config.node_id(), "Starting Fuelline node");

    match role {
        NodeRole::Hub => run_hub(&config).await?,
        NodeRole::Relay => run_relay(&config).await?,
        NodeRole::Leaf => run_leaf(&config).await,
    }

    info!(%role, "Node shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fuelline=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn open_database(config: &NodeConfig, role: NodeRole) -> anyhow::Result<Database> {
    let path = config.database_path(role);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = Database::new(DbConfig::new(&path))
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    info!(path = %path.display(), "Database ready");
    Ok(db)
}

// =============================================================================
// Roles
// =============================================================================

async fn run_hub(config: &NodeConfig) -> anyhow::Result<()> {
    let db = open_database(config, NodeRole::Hub).await?;
    let hub = HubServer::new(HubConfig::from_node_config(config), Arc::new(db.clone()))
        .start()
        .await?;
    info!(addr = %hub.local_addr(), "Hub listening for relays");

    tokio::select! {
        _ = console::run(hub.clone(), db.clone()) => info!("Console closed"),
        _ = shutdown_signal() => {}
    }

    hub.shutdown().await;
    db.close().await;
    Ok(())
}

async fn run_relay(config: &NodeConfig) -> anyhow::Result<()> {
    let db = open_database(config, NodeRole::Relay).await?;
    let relay = RelayNode::new(RelayConfig::from_node_config(config), Arc::new(db.clone()))
        .start()
        .await?;
    info!(
        addr = %relay.local_addr(),
        hub = %config.relay.hub_addr,
        "Relay listening for leaves"
    );

    let report = async {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        loop {
            ticker.tick().await;
            info!("{}", relay.status().await);
        }
    };

    tokio::select! {
        _ = report => {}
        _ = shutdown_signal() => {}
    }

    relay.shutdown().await;
    db.close().await;
    Ok(())
}

async fn run_leaf(config: &NodeConfig) {
    let leaf = LeafNode::new(LeafConfig::from_node_config(config)).start();
    info!(relay = %config.leaf.relay_addr, "Leaf started");

    let report = async {
        let mut ticker = tokio::time::interval(STATUS_INTERVAL);
        loop {
            ticker.tick().await;
            info!(
                sales = leaf.sales_completed(),
                unsent = leaf.unsent_reports(),
                "{}",
                leaf.status().await
            );
        }
    };

    tokio::select! {
        _ = report => {}
        _ = shutdown_signal() => {}
    }

    let unsent = leaf.unsent_reports();
    if unsent > 0 {
        warn!(
            unsent,
            "Shutting down with unsent sale reports; the leaf keeps no outbox, so they are lost"
        );
    }
    leaf.shutdown().await;
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
