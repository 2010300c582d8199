//! # Relay Node
//!
//! The middle tier. Toward leaves it is a server: it pushes each new leaf a
//! snapshot of its price cache, fans out price changes, and accepts sale
//! reports. Toward the hub it is a client that keeps reconnecting forever.
//!
//! ## Report Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Relay Report Flow                                   │
//! │                                                                         │
//! │  Leaf ──TransactionReport──► stamp relay_id                             │
//! │                                   │                                     │
//! │                                   ▼                                     │
//! │                          outbox.append() → id        (unsynced)         │
//! │                                   │                                     │
//! │                      ┌────────────┴────────────┐                        │
//! │                      ▼                         ▼                        │
//! │               hub link up                hub link down                  │
//! │               forward now                stays unsynced                 │
//! │               mark_synced(id)                  │                        │
//! │                                                ▼                        │
//! │                                  next reconnect: sync pass              │
//! │                                  list_unsynced() ascending,             │
//! │                                  forward + mark each,                   │
//! │                                  stop at first failed forward           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Autonomous Mode
//! While the hub link is down the relay keeps serving leaves from its cache
//! and keeps persisting their reports.
//!
//! ## Outbox Pruning
//! A timer deletes synced records older than the retention period. Unsynced
//! records stay until a sync pass delivers them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityEntry, ActivityLog};
use crate::config::{NodeConfig, NodeRole};
use crate::error::{SyncError, SyncResult};
use crate::protocol::Message;
use crate::registry::ConnectionRegistry;
use crate::status::NodeStatus;
use crate::store::TransactionStore;
use crate::transport::{connect, read_loop, split_stream, Link, ACCEPT_RETRY_DELAY};
use fuelline_core::{FuelType, Margin, Price, PriceCache, Transaction};

// =============================================================================
// Relay Configuration
// =============================================================================

/// Configuration for a relay node.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Stamped into every forwarded report.
    pub node_id: String,
    /// Address leaves connect to.
    pub bind_addr: String,
    /// Hub address for the upstream link.
    pub hub_addr: String,
    /// Fixed wait between hub connection attempts.
    pub reconnect_delay: Duration,
    pub max_frame_len: usize,
    pub margin: Margin,
    /// Synced outbox records older than this are pruned.
    pub outbox_retention_days: u32,
    /// Zero disables pruning.
    pub cleanup_interval: Duration,
}

impl RelayConfig {
    pub fn from_node_config(config: &NodeConfig) -> Self {
        RelayConfig {
            node_id: config.node_id().to_string(),
            bind_addr: config.relay.bind_addr.clone(),
            hub_addr: config.relay.hub_addr.clone(),
            reconnect_delay: config.relay.reconnect_delay(),
            max_frame_len: config.max_frame_len(),
            margin: Margin::RELAY,
            outbox_retention_days: config.relay.outbox_retention_days,
            cleanup_interval: config.relay.cleanup_interval(),
        }
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassSummary {
    /// Unsynced records found when the pass started.
    pub pending: usize,
    /// Records written to the hub.
    pub forwarded: usize,
    /// Forwarded records whose synced flag was set.
    pub marked: usize,
    /// The pass stopped at a failed forward.
    pub aborted: bool,
}

// =============================================================================
// Relay State
// =============================================================================

struct RelayState {
    config: RelayConfig,
    leaves: ConnectionRegistry<OwnedWriteHalf>,
    hub: Link<OwnedWriteHalf>,
    /// Final prices, margin applied.
    prices: RwLock<PriceCache>,
    store: Arc<dyn TransactionStore>,
    activity: ActivityLog,
}

impl RelayState {
    // -------------------------------------------------------------------------
    // Leaf side
    // -------------------------------------------------------------------------

    async fn handle_leaf(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let peer = addr.to_string();
        let (mut reader, writer) = split_stream(stream, self.config.max_frame_len);

        let registration = self
            .leaves
            .add_with_snapshot(peer.clone(), writer, || self.snapshot_frames())
            .await;
        match &registration.snapshot {
            Ok(sent) => self
                .activity
                .record(format!("Leaf connected from {}, sent {} price(s)", peer, sent)),
            Err(e) => self
                .activity
                .record(format!("Leaf connected from {}, snapshot failed: {}", peer, e)),
        }

        let outcome = read_loop(&mut reader, &registration.closed, &peer, |message| {
            self.handle_leaf_message(&peer, message)
        })
        .await;

        self.leaves.remove_and_close(registration.id).await;
        self.activity
            .record(format!("Leaf {} disconnected ({})", peer, outcome));
    }

    /// Encoded `PriceLocalUpdate` for every cached price.
    async fn snapshot_frames(&self) -> Vec<Vec<u8>> {
        let prices = self.prices.read().await.snapshot();
        prices
            .into_iter()
            .filter_map(|(fuel_type, price)| {
                match Message::price_local(fuel_type, price).encode() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(error = %e, "Skipping unencodable snapshot entry");
                        None
                    }
                }
            })
            .collect()
    }

    async fn handle_leaf_message(&self, peer: &str, message: Message) {
        match message {
            Message::TransactionReport(transaction) => self.accept_report(transaction).await,
            Message::Heartbeat { node_id, status } => {
                self.activity
                    .record(format!("Heartbeat from leaf {} ({}): {}", node_id, peer, status));
            }
            other => {
                debug!(peer, kind = other.type_name(), "Ignoring message not meant for a relay");
            }
        }
    }

    /// Persists a leaf's report, then forwards it if the hub is reachable.
    async fn accept_report(&self, transaction: Transaction) {
        let transaction = transaction.stamped(self.config.node_id.clone());

        let id = match self.store.append(&transaction).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    leaf_id = %transaction.leaf_id,
                    error = %e,
                    "Failed to persist transaction report"
                );
                None
            }
        };

        self.activity.record(format!(
            "Sale from {}: {} L of {}{}",
            transaction.leaf_id,
            transaction.litres,
            transaction.fuel_type,
            id.map(|id| format!(" (outbox #{})", id)).unwrap_or_default()
        ));

        if !self.hub.is_established() {
            debug!(outbox_id = ?id, "Hub link down, report left for the next sync pass");
            return;
        }

        match self.hub.send(&Message::TransactionReport(transaction)).await {
            Ok(()) => {
                if let Some(id) = id {
                    if let Err(e) = self.store.mark_synced(id).await {
                        warn!(outbox_id = id, error = %e, "Forwarded but could not mark synced");
                    }
                }
            }
            Err(e) => {
                warn!(outbox_id = ?id, error = %e, "Forward to hub failed, will retry");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Hub side
    // -------------------------------------------------------------------------

    async fn handle_hub_message(&self, message: Message) {
        match message {
            Message::PriceBaseUpdate {
                fuel_type,
                base_price,
            } => self.apply_base_price(fuel_type, base_price).await,
            other => {
                debug!(kind = other.type_name(), "Ignoring message from hub");
            }
        }
    }

    async fn apply_base_price(&self, fuel_type: FuelType, base_price: Price) {
        let final_price = self.config.margin.apply(base_price);
        self.prices
            .write()
            .await
            .set(fuel_type.clone(), final_price);

        let payload = match Message::price_local(fuel_type.clone(), final_price).encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode price update");
                return;
            }
        };

        let outcome = self.leaves.broadcast(&payload).await;
        self.activity.record(format!(
            "Price {}: base {} -> final {}, sent to {} leaf(s)",
            fuel_type, base_price, final_price, outcome.delivered
        ));
    }

    /// Forwards every unsynced record in ascending id order.
    ///
    /// Stops at the first failed forward. A failed mark leaves the record
    /// for the next pass and does not stop this one.
    async fn sync_pass(&self) -> SyncPassSummary {
        let hub = &self.hub;
        self.forward_unsynced(move |message| async move { hub.send(&message).await })
            .await
    }

    async fn forward_unsynced<F, Fut>(&self, mut forward: F) -> SyncPassSummary
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let records = match self.store.list_unsynced().await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Sync pass could not read the outbox");
                return SyncPassSummary::default();
            }
        };

        let mut summary = SyncPassSummary {
            pending: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return summary;
        }

        for record in records {
            let message = Message::TransactionReport(record.transaction);
            if let Err(e) = forward(message).await {
                warn!(outbox_id = record.id, error = %e, "Sync pass aborted");
                summary.aborted = true;
                break;
            }
            summary.forwarded += 1;

            match self.store.mark_synced(record.id).await {
                Ok(()) => summary.marked += 1,
                Err(e) => warn!(outbox_id = record.id, error = %e, "Could not mark record synced"),
            }
        }

        self.activity.record(format!(
            "Sync pass forwarded {} of {} pending report(s){}",
            summary.forwarded,
            summary.pending,
            if summary.aborted { ", aborted" } else { "" }
        ));
        summary
    }

    /// Deletes synced records past the retention period.
    async fn cleanup_outbox(&self) -> u64 {
        match self.store.cleanup_synced(self.config.outbox_retention_days).await {
            Ok(0) => 0,
            Ok(removed) => {
                self.activity
                    .record(format!("Pruned {} synced outbox record(s)", removed));
                removed
            }
            Err(e) => {
                warn!(error = %e, "Outbox cleanup failed");
                0
            }
        }
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn accept_loop(state: Arc<RelayState>, listener: TcpListener, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(state.clone().handle_leaf(stream, addr));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    let closed = state.leaves.close_all().await;
    info!(closed, "Relay accept loop stopped");
}

async fn cleanup_loop(state: Arc<RelayState>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(state.config.cleanup_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                state.cleanup_outbox().await;
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// Keeps the hub link up for the life of the relay.
async fn hub_link_loop(state: Arc<RelayState>, mut shutdown_rx: watch::Receiver<bool>) {
    let hub_addr = state.config.hub_addr.clone();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match connect(&hub_addr, state.config.max_frame_len).await {
            Ok((mut reader, writer)) => {
                let closed = state.hub.install(writer).await;
                if *shutdown_rx.borrow() {
                    state.hub.teardown().await;
                    break;
                }
                state.activity.record(format!("Connected to hub at {}", hub_addr));

                if let Err(e) = state.hub.send(&Message::online(state.config.node_id.clone())).await {
                    warn!(error = %e, "Failed to announce to hub");
                }

                let pass_state = state.clone();
                tokio::spawn(async move {
                    pass_state.sync_pass().await;
                });

                let outcome = read_loop(&mut reader, &closed, &hub_addr, |message| {
                    state.handle_hub_message(message)
                })
                .await;

                state.hub.teardown().await;
                state
                    .activity
                    .record(format!("Hub link lost ({}), running autonomously", outcome));
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?state.config.reconnect_delay, "Hub unreachable");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(state.config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    state.hub.teardown().await;
    info!("Relay hub link stopped");
}

// =============================================================================
// Relay Node
// =============================================================================

/// A relay node. Call [`RelayNode::start`] to bind and connect.
pub struct RelayNode {
    config: RelayConfig,
    store: Arc<dyn TransactionStore>,
}

/// Handle for a running relay. Cheap to clone.
#[derive(Clone)]
pub struct RelayHandle {
    state: Arc<RelayState>,
    local_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl RelayNode {
    pub fn new(config: RelayConfig, store: Arc<dyn TransactionStore>) -> Self {
        RelayNode { config, store }
    }

    /// Binds the leaf listener and spawns the accept and hub-link loops.
    pub async fn start(self) -> SyncResult<RelayHandle> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| SyncError::BindFailed {
                addr: self.config.bind_addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            node_id = %self.config.node_id,
            addr = %local_addr,
            hub = %self.config.hub_addr,
            margin_bps = self.config.margin.bps(),
            "Relay started"
        );

        let state = Arc::new(RelayState {
            config: self.config,
            leaves: ConnectionRegistry::new("leaf"),
            hub: Link::new(),
            prices: RwLock::new(PriceCache::new()),
            store: self.store,
            activity: ActivityLog::new("relay"),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(state.clone(), listener, shutdown_rx.clone()));
        if !state.config.cleanup_interval.is_zero() {
            tokio::spawn(cleanup_loop(state.clone(), shutdown_rx.clone()));
        }
        tokio::spawn(hub_link_loop(state.clone(), shutdown_rx));

        Ok(RelayHandle {
            state,
            local_addr,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }
}

impl RelayHandle {
    /// Address leaves connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn leaf_count(&self) -> usize {
        self.state.leaves.len().await
    }

    /// True while the hub link is up. Does not block.
    pub fn is_linked(&self) -> bool {
        self.state.hub.is_established()
    }

    /// Final prices, sorted by fuel type.
    pub async fn prices(&self) -> Vec<(FuelType, Price)> {
        self.state.prices.read().await.snapshot()
    }

    pub async fn unsynced_count(&self) -> SyncResult<i64> {
        self.state.store.count_unsynced().await
    }

    /// Runs a sync pass now instead of waiting for the next reconnect.
    pub async fn sync_pass(&self) -> SyncPassSummary {
        self.state.sync_pass().await
    }

    pub async fn status(&self) -> NodeStatus {
        let mut status = NodeStatus::new(NodeRole::Relay, self.state.config.node_id.clone());
        status.connections = self.leaf_count().await;
        status.linked = Some(self.is_linked());
        status.unsynced = self.unsynced_count().await.ok();
        status.prices = self.prices().await;
        status
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.state.activity.recent(limit)
    }

    /// Stops both loops and closes every connection.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.state.hub.teardown().await;
        self.state.leaves.close_all().await;
        info!(node_id = %self.state.config.node_id, "Relay shut down");
    }
}
