//! # Hub Server
//!
//! The top tier: accepts relay connections, broadcasts base prices to all
//! of them, and records every transaction report they forward.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Hub Architecture                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      HubServer (TCP)                            │   │
//! │  │                                                                 │   │
//! │  │  accept loop ──▶ one task per relay connection                  │   │
//! │  │                        │                                        │   │
//! │  │                        ▼                                        │   │
//! │  │              ┌─────────────────┐                                │   │
//! │  │              │   read loop     │ ── TransactionReport ──▶ ledger│   │
//! │  │              └────────┬────────┘ ── Heartbeat ──▶ activity log  │   │
//! │  │                       │                                         │   │
//! │  │         ┌─────────────┼─────────────┐                          │   │
//! │  │         ▼             ▼             ▼                          │   │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐                      │   │
//! │  │  │ Relay #1 │  │ Relay #2 │  │ Relay #3 │   ConnectionRegistry │   │
//! │  │  └──────────┘  └──────────┘  └──────────┘                      │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  Admin console ──▶ HubHandle::broadcast_price ──▶ PriceBaseUpdate      │
//! │                                                   to every relay        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Relays only learn prices from live broadcasts; a relay that connects
//! after a broadcast waits for the next one.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityEntry, ActivityLog};
use crate::config::{NodeConfig, NodeRole};
use crate::error::{SyncError, SyncResult};
use crate::protocol::Message;
use crate::registry::{BroadcastOutcome, ConnectionRegistry};
use crate::status::NodeStatus;
use crate::store::LedgerStore;
use crate::transport::{read_loop, split_stream, ACCEPT_RETRY_DELAY};
use fuelline_core::{FuelType, PriceCache, Price, Transaction};
use fuelline_db::{FuelTotals, RelayTotals};


// =============================================================================
// Hub Configuration
// =============================================================================

/// Configuration for the hub server.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub node_id: String,
    /// Address relays connect to.
    pub bind_addr: String,
    pub max_frame_len: usize,
}

impl HubConfig {
    pub fn from_node_config(config: &NodeConfig) -> Self {
        HubConfig {
            node_id: config.node_id().to_string(),
            bind_addr: config.hub.bind_addr.clone(),
            max_frame_len: config.max_frame_len(),
        }
    }
}

// =============================================================================
// Hub State
// =============================================================================

struct HubState {
    config: HubConfig,
    relays: ConnectionRegistry<OwnedWriteHalf>,
    /// Last base price broadcast per fuel type.
    prices: RwLock<PriceCache>,
    ledger: Arc<dyn LedgerStore>,
    activity: ActivityLog,
}

impl HubState {
    async fn handle_relay(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let peer = addr.to_string();
        let (mut reader, writer) = split_stream(stream, self.config.max_frame_len);
        let registration = self.relays.add(peer.clone(), writer).await;
        self.activity.record(format!("Relay connected from {}", peer));

        let outcome = read_loop(&mut reader, &registration.closed, &peer, |message| {
            self.handle_message(&peer, message)
        })
        .await;

        self.relays.remove_and_close(registration.id).await;
        self.activity
            .record(format!("Relay {} disconnected ({})", peer, outcome));
    }

    async fn handle_message(&self, peer: &str, message: Message) {
        match message {
            Message::TransactionReport(transaction) => self.record_report(peer, transaction).await,
            Message::Heartbeat { node_id, status } => {
                self.activity
                    .record(format!("Heartbeat from {} ({}): {}", node_id, peer, status));
            }
            other => {
                debug!(peer, kind = other.type_name(), "Ignoring message not meant for the hub");
            }
        }
    }

    async fn record_report(&self, peer: &str, transaction: Transaction) {
        match self.ledger.record(&transaction).await {
            Ok(id) => {
                self.activity.record(format!(
                    "Sale #{}: {} L of {} at {} via {}",
                    id,
                    transaction.litres,
                    transaction.fuel_type,
                    transaction.leaf_id,
                    transaction.relay_id.as_deref().unwrap_or("unknown relay"),
                ));
            }
            Err(e) => {
                error!(
                    peer,
                    leaf_id = %transaction.leaf_id,
                    error = %e,
                    "Failed to record transaction report"
                );
            }
        }
    }
}

// =============================================================================
// Hub Server
// =============================================================================

/// The hub server. Call [`HubServer::start`] to bind and serve.
pub struct HubServer {
    config: HubConfig,
    ledger: Arc<dyn LedgerStore>,
}

/// Handle for controlling a running hub.
///
/// Cheap to clone. The server stops when [`HubHandle::shutdown`] is called
/// or the last handle is dropped.
#[derive(Clone)]
pub struct HubHandle {
    state: Arc<HubState>,
    local_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl HubServer {
    pub fn new(config: HubConfig, ledger: Arc<dyn LedgerStore>) -> Self {
        HubServer { config, ledger }
    }

    /// Binds the listener and spawns the accept loop.
    pub async fn start(self) -> SyncResult<HubHandle> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| SyncError::BindFailed {
                addr: self.config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(node_id = %self.config.node_id, addr = %local_addr, "Hub server started");

        let state = Arc::new(HubState {
            config: self.config,
            relays: ConnectionRegistry::new("relay"),
            prices: RwLock::new(PriceCache::new()),
            ledger: self.ledger,
            activity: ActivityLog::new("hub"),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(state.clone(), listener, shutdown_rx));

        Ok(HubHandle {
            state,
            local_addr,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }
}

async fn accept_loop(state: Arc<HubState>, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(state.clone().handle_relay(stream, addr));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    let closed = state.relays.close_all().await;
    info!(closed, "Hub accept loop stopped");
}

impl HubHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends a new base price to every connected relay.
    ///
    /// Relays whose write fails are dropped after the broadcast completes.
    pub async fn broadcast_price(
        &self,
        fuel_type: impl Into<FuelType>,
        base_price: Price,
    ) -> SyncResult<BroadcastOutcome> {
        let fuel_type = fuel_type.into();
        let payload = Message::price_base(fuel_type.clone(), base_price).encode()?;

        self.state
            .prices
            .write()
            .await
            .set(fuel_type.clone(), base_price);

        let outcome = self.state.relays.broadcast(&payload).await;
        self.state.activity.record(format!(
            "Base price {} = {} sent to {} relay(s){}",
            fuel_type,
            base_price,
            outcome.delivered,
            if outcome.evicted.is_empty() {
                String::new()
            } else {
                format!(", {} dropped", outcome.evicted.len())
            }
        ));
        Ok(outcome)
    }

    /// Number of connected relays.
    pub async fn connection_count(&self) -> usize {
        self.state.relays.len().await
    }

    /// Last broadcast base prices, sorted by fuel type.
    pub async fn prices(&self) -> Vec<(FuelType, Price)> {
        self.state.prices.read().await.snapshot()
    }

    pub async fn fuel_totals(&self) -> SyncResult<Vec<FuelTotals>> {
        self.state.ledger.totals_by_fuel_type().await
    }

    pub async fn relay_totals(&self) -> SyncResult<Vec<RelayTotals>> {
        self.state.ledger.totals_by_relay().await
    }

    pub async fn status(&self) -> NodeStatus {
        let mut status = NodeStatus::new(NodeRole::Hub, self.state.config.node_id.clone());
        status.connections = self.connection_count().await;
        status.prices = self.prices().await;
        status
    }

    /// Most recent activity lines, oldest first.
    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.state.activity.recent(limit)
    }

    /// Stops accepting and closes every relay connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.relays.close_all().await;
        info!(node_id = %self.state.config.node_id, "Hub shut down");
    }
}
