//! # Leaf Node
//!
//! The bottom tier: a sale point that keeps a local price cache fed by its
//! relay, simulates sales against it, and reports each completed sale.
//!
//! ## Operational Lock
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │      ┌────────┐   begin_sale(fuel)    ┌───────────┐                     │
//! │      │  Idle  │ ────────────────────► │ Operating │                     │
//! │      │        │ ◄──────────────────── │           │                     │
//! │      └────────┘   finish_sale()       └───────────┘                     │
//! │          │        applies queued          │                             │
//! │          │        prices, then one        │                             │
//! │          │        TransactionReport       │                             │
//! │          ▼                                ▼                             │
//! │   PriceLocalUpdate                 PriceLocalUpdate                     │
//! │   applied at once                  queued per fuel type,                │
//! │                                    latest wins                          │
//! │                                                                         │
//! │  The lock covers each transition; loading runs with it released.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outgoing Queue
//! Reports go through an unbounded queue drained by the connection task.
//! While the relay is unreachable they wait there; a report whose write
//! failed is sent first on the next connection.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::activity::{ActivityEntry, ActivityLog};
use crate::config::{LeafSettings, NodeConfig, NodeRole};
use crate::error::{SyncError, SyncResult};
use crate::framer::FrameWriter;
use crate::protocol::Message;
use crate::status::NodeStatus;
use crate::transport::{connect, read_loop};
use fuelline_core::{
    CoreError, FuelType, OperationalState, Price, Transaction, UpdateOutcome,
};

/// Smallest simulated sale, in litres.
pub const MIN_SALE_LITRES: f64 = 5.0;

/// Largest simulated sale, in litres.
pub const MAX_SALE_LITRES: f64 = 60.0;

// =============================================================================
// Configuration
// =============================================================================

/// Parameters of the periodic sale simulation.
#[derive(Debug, Clone)]
pub struct SaleSimulation {
    pub fuel_types: Vec<FuelType>,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub min_loading: Duration,
    pub max_loading: Duration,
}

impl SaleSimulation {
    pub fn from_settings(settings: &LeafSettings) -> Self {
        SaleSimulation {
            fuel_types: settings.fuel_types.iter().map(|f| FuelType::new(f.clone())).collect(),
            min_interval: Duration::from_secs(settings.min_sale_interval_secs),
            max_interval: Duration::from_secs(settings.max_sale_interval_secs),
            min_loading: Duration::from_secs(settings.min_loading_secs),
            max_loading: Duration::from_secs(settings.max_loading_secs),
        }
    }

    /// Wait before the next sale attempt.
    pub fn next_interval(&self) -> Duration {
        random_duration(self.min_interval, self.max_interval)
    }

    /// Fuel, litres (two decimals), and loading time for one sale.
    pub fn next_sale(&self) -> Option<(FuelType, f64, Duration)> {
        let mut rng = rand::rng();
        let fuel_type = self.fuel_types.choose(&mut rng)?.clone();
        let litres = rng.random_range(MIN_SALE_LITRES..=MAX_SALE_LITRES);
        let litres = (litres * 100.0).round() / 100.0;
        Some((
            fuel_type,
            litres,
            random_duration(self.min_loading, self.max_loading),
        ))
    }
}

fn random_duration(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    if max_ms <= min_ms {
        return min;
    }
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}

/// Configuration for a leaf node.
#[derive(Debug, Clone)]
pub struct LeafConfig {
    /// Reported as `leaf_id` on every sale.
    pub node_id: String,
    pub relay_addr: String,
    /// Fixed wait between relay connection attempts.
    pub reconnect_delay: Duration,
    pub max_frame_len: usize,
    /// `None` disables the simulation; sales then come only from
    /// [`LeafHandle::sell`].
    pub simulation: Option<SaleSimulation>,
}

impl LeafConfig {
    pub fn from_node_config(config: &NodeConfig) -> Self {
        LeafConfig {
            node_id: config.node_id().to_string(),
            relay_addr: config.leaf.relay_addr.clone(),
            reconnect_delay: config.leaf.reconnect_delay(),
            max_frame_len: config.max_frame_len(),
            simulation: config
                .leaf
                .simulate_sales
                .then(|| SaleSimulation::from_settings(&config.leaf)),
        }
    }
}

/// A completed sale.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleReceipt {
    pub transaction: Transaction,
    /// Price in effect when the sale began.
    pub unit_price: Price,
    /// Updates that were queued during the sale and applied at its end.
    pub applied_updates: Vec<(FuelType, Price)>,
}

// =============================================================================
// Leaf State
// =============================================================================

struct LeafState {
    config: LeafConfig,
    /// Cache, operating flag, and pending updates as one unit.
    ops: Mutex<OperationalState>,
    linked: AtomicBool,
    outgoing: mpsc::UnboundedSender<Message>,
    /// Reports queued but not yet written to a relay.
    unsent_reports: Arc<AtomicUsize>,
    sales: AtomicU64,
    activity: ActivityLog,
}

impl LeafState {
    async fn handle_message(&self, message: Message) {
        match message {
            Message::PriceLocalUpdate {
                fuel_type,
                final_price,
            } => {
                let outcome = self
                    .ops
                    .lock()
                    .await
                    .receive_update(fuel_type.clone(), final_price);
                match outcome {
                    UpdateOutcome::Applied => self
                        .activity
                        .record(format!("Price {} = {}", fuel_type, final_price)),
                    UpdateOutcome::Queued => self.activity.record(format!(
                        "Price {} = {} queued until the sale completes",
                        fuel_type, final_price
                    )),
                }
            }
            Message::Heartbeat { node_id, status } => {
                self.activity
                    .record(format!("Heartbeat from {}: {}", node_id, status));
            }
            other => {
                debug!(kind = other.type_name(), "Ignoring message not meant for a leaf");
            }
        }
    }

    /// Once the lock is taken, loading and [`LeafState::finish_sale`] run on
    /// their own task, so the sale completes even if the caller stops waiting.
    async fn sell(
        self: &Arc<Self>,
        fuel_type: &str,
        litres: f64,
        loading: Duration,
    ) -> SyncResult<SaleReceipt> {
        let unit_price = self.ops.lock().await.begin_sale(fuel_type)?;
        self.activity.record(format!(
            "Sale started: {} L of {} at {}",
            litres, fuel_type, unit_price
        ));

        let state = Arc::clone(self);
        let fuel_type = fuel_type.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(loading).await;
            state.finish_sale(&fuel_type, litres, unit_price).await
        })
        .await
        .map_err(|e| SyncError::ChannelError(format!("Sale task failed: {}", e)))?
    }

    /// Releases the lock, applies queued prices, and queues the report.
    async fn finish_sale(&self, fuel_type: &str, litres: f64, unit_price: Price) -> SyncResult<SaleReceipt> {
        let applied_updates = self.ops.lock().await.finish_sale();
        for (fuel, price) in &applied_updates {
            self.activity
                .record(format!("Queued price applied: {} = {}", fuel, price));
        }

        let transaction = Transaction::new(self.config.node_id.clone(), fuel_type, litres);
        self.unsent_reports.fetch_add(1, Ordering::AcqRel);
        if self
            .outgoing
            .send(Message::TransactionReport(transaction.clone()))
            .is_err()
        {
            self.unsent_reports.fetch_sub(1, Ordering::AcqRel);
            return Err(SyncError::ChannelError("Outgoing queue closed".into()));
        }
        self.sales.fetch_add(1, Ordering::Relaxed);

        self.activity.record(format!(
            "Sale completed: {} L of {}{}",
            litres,
            fuel_type,
            if self.linked.load(Ordering::Acquire) {
                ""
            } else {
                ", report queued until relay returns"
            }
        ));

        Ok(SaleReceipt {
            transaction,
            unit_price,
            applied_updates,
        })
    }
}

// =============================================================================
// Loops
// =============================================================================

/// Writes queued messages until told to stop or a write fails.
///
/// Hands back the queue and any message that could not be written.
async fn drain_outgoing<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    mut unsent: Option<Message>,
    unsent_reports: Arc<AtomicUsize>,
    stop: Arc<Notify>,
    reader_closed: Arc<Notify>,
) -> (mpsc::UnboundedReceiver<Message>, Option<Message>) {
    loop {
        let message = match unsent.take() {
            Some(message) => message,
            None => {
                let next = tokio::select! {
                    biased;
                    _ = stop.notified() => break,
                    next = outgoing_rx.recv() => next,
                };
                match next {
                    Some(message) => message,
                    None => break,
                }
            }
        };

        if let Err(e) = writer.send_message(&message).await {
            warn!(kind = message.type_name(), error = %e, "Write to relay failed");
            unsent = Some(message);
            reader_closed.notify_one();
            break;
        }
        if matches!(message, Message::TransactionReport(_)) {
            unsent_reports.fetch_sub(1, Ordering::AcqRel);
        }
    }

    let _ = writer.shutdown().await;
    (outgoing_rx, unsent)
}

/// Keeps the relay link up for the life of the leaf.
async fn relay_link_loop(
    state: Arc<LeafState>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let relay_addr = state.config.relay_addr.clone();
    let mut unsent: Option<Message> = None;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match connect(&relay_addr, state.config.max_frame_len).await {
            Ok((mut reader, mut writer)) => {
                if let Err(e) = writer
                    .send_message(&Message::online(state.config.node_id.clone()))
                    .await
                {
                    warn!(error = %e, "Failed to announce to relay");
                } else {
                    state.linked.store(true, Ordering::Release);
                    state.activity.record(format!("Connected to relay at {}", relay_addr));

                    let reader_closed = Arc::new(Notify::new());
                    let stop_writer = Arc::new(Notify::new());
                    let drain = tokio::spawn(drain_outgoing(
                        writer,
                        outgoing_rx,
                        unsent.take(),
                        state.unsent_reports.clone(),
                        stop_writer.clone(),
                        reader_closed.clone(),
                    ));

                    let outcome = tokio::select! {
                        outcome = read_loop(&mut reader, &reader_closed, &relay_addr, |message| {
                            state.handle_message(message)
                        }) => outcome.to_string(),
                        _ = shutdown_rx.changed() => "shutting down".to_string(),
                    };

                    state.linked.store(false, Ordering::Release);
                    stop_writer.notify_one();
                    match drain.await {
                        Ok((rx, left)) => {
                            outgoing_rx = rx;
                            unsent = left;
                        }
                        Err(e) => {
                            error!(error = %e, "Outgoing queue task failed, leaf link stopped");
                            return;
                        }
                    }
                    state
                        .activity
                        .record(format!("Relay link lost ({}), selling from cache", outcome));

                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, retry_in = ?state.config.reconnect_delay, "Relay unreachable");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(state.config.reconnect_delay) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    state.linked.store(false, Ordering::Release);
    info!("Leaf relay link stopped");
}

/// Attempts a sale every interval while the relay link is up.
async fn simulate_sales(
    state: Arc<LeafState>,
    simulation: SaleSimulation,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(simulation.next_interval()) => {}
            _ = shutdown_rx.changed() => break,
        }

        if !state.linked.load(Ordering::Acquire) {
            debug!("Relay link down, no sale this round");
            continue;
        }

        let Some((fuel_type, litres, loading)) = simulation.next_sale() else {
            break;
        };

        match state.sell(fuel_type.as_str(), litres, loading).await {
            Ok(receipt) => debug!(
                fuel_type = %receipt.transaction.fuel_type,
                litres = receipt.transaction.litres,
                unit_price = receipt.unit_price,
                "Simulated sale done"
            ),
            Err(SyncError::Core(CoreError::UnknownPrice(fuel))) => {
                debug!(fuel_type = %fuel, "No price yet, sale abandoned");
            }
            Err(e) => warn!(error = %e, "Simulated sale failed"),
        }
    }
}

// =============================================================================
// Leaf Node
// =============================================================================

/// A leaf node. Call [`LeafNode::start`] to begin connecting.
pub struct LeafNode {
    config: LeafConfig,
}

/// Handle for a running leaf. Cheap to clone.
#[derive(Clone)]
pub struct LeafHandle {
    state: Arc<LeafState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl LeafNode {
    pub fn new(config: LeafConfig) -> Self {
        LeafNode { config }
    }

    /// Spawns the relay link and, if configured, the sale simulation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> LeafHandle {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let simulation = self.config.simulation.clone();

        info!(
            node_id = %self.config.node_id,
            relay = %self.config.relay_addr,
            simulate = simulation.is_some(),
            "Leaf started"
        );

        let state = Arc::new(LeafState {
            config: self.config,
            ops: Mutex::new(OperationalState::new()),
            linked: AtomicBool::new(false),
            outgoing: outgoing_tx,
            unsent_reports: Arc::new(AtomicUsize::new(0)),
            sales: AtomicU64::new(0),
            activity: ActivityLog::new("leaf"),
        });

        tokio::spawn(relay_link_loop(state.clone(), outgoing_rx, shutdown_rx.clone()));
        if let Some(simulation) = simulation {
            tokio::spawn(simulate_sales(state.clone(), simulation, shutdown_rx));
        }

        LeafHandle {
            state,
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }
}

impl LeafHandle {
    /// Runs one sale: lock, load for `loading`, unlock, report.
    ///
    /// Fails without any state change if `fuel_type` has no cached price or
    /// a sale is already running. Dropping the returned future after the
    /// sale started does not abort it.
    pub async fn sell(&self, fuel_type: &str, litres: f64, loading: Duration) -> SyncResult<SaleReceipt> {
        self.state.sell(fuel_type, litres, loading).await
    }

    /// Visible prices, sorted by fuel type. Queued updates are not included.
    pub async fn prices(&self) -> Vec<(FuelType, Price)> {
        self.state.ops.lock().await.cache().snapshot()
    }

    /// Cached price for one fuel type.
    pub async fn price(&self, fuel_type: &str) -> Option<Price> {
        self.state.ops.lock().await.cache().get(fuel_type)
    }

    pub async fn is_operating(&self) -> bool {
        self.state.ops.lock().await.is_operating()
    }

    /// Updates waiting for the current sale to finish.
    pub async fn pending_count(&self) -> usize {
        self.state.ops.lock().await.pending_count()
    }

    pub fn is_linked(&self) -> bool {
        self.state.linked.load(Ordering::Acquire)
    }

    /// Sale reports not yet written to a relay. Held in memory only.
    pub fn unsent_reports(&self) -> usize {
        self.state.unsent_reports.load(Ordering::Acquire)
    }

    /// Sales completed since start.
    pub fn sales_completed(&self) -> u64 {
        self.state.sales.load(Ordering::Relaxed)
    }

    pub async fn status(&self) -> NodeStatus {
        let ops = self.state.ops.lock().await;
        let mut status = NodeStatus::new(NodeRole::Leaf, self.state.config.node_id.clone());
        status.linked = Some(self.is_linked());
        status.unsynced = Some(self.unsent_reports() as i64);
        status.operating = Some(ops.is_operating());
        status.queued_updates = ops.pending_count();
        status.prices = ops.cache().snapshot();
        status
    }

    pub fn recent_activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.state.activity.recent(limit)
    }

    /// Stops the link and the simulation.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        info!(node_id = %self.state.config.node_id, "Leaf shut down");
    }
}
