//! # Connection Registry
//!
//! The set of live downstream connections held by a server role: relays at
//! the hub, leaves at a relay.
//!
//! ## Broadcast With Deferred Eviction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        broadcast(payload)                               │
//! │                                                                         │
//! │  lock set                                                               │
//! │    for each connection:                                                 │
//! │       write frame ── ok ──► delivered += 1                              │
//! │                    └ err ─► remember id          (set untouched)        │
//! │    for each remembered id:                                              │
//! │       remove, wake its read loop, shut down its writer                  │
//! │  unlock                                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The set is never mutated while it is being iterated. One slow or dead
//! peer costs the others a failed write, nothing more.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::framer::{FrameError, FrameWriter};

/// Registry-assigned connection identifier.
pub type ConnectionId = u64;

struct Entry<W> {
    peer: String,
    writer: FrameWriter<W>,
    closed: Arc<Notify>,
}

impl<W: AsyncWrite + Unpin> Entry<W> {
    async fn close(mut self) {
        self.closed.notify_one();
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Writer shutdown failed");
        }
    }
}

/// Result of [`ConnectionRegistry::add`].
#[derive(Debug)]
pub struct Registration {
    pub id: ConnectionId,
    /// Notified when the connection is removed; the read loop watches it.
    pub closed: Arc<Notify>,
    /// Frames of the snapshot that were written, or the error that cut the
    /// snapshot short.
    pub snapshot: Result<usize, FrameError>,
}

/// Result of [`ConnectionRegistry::broadcast`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub evicted: Vec<ConnectionId>,
}

/// Live connections, each with its own writer and close signal.
pub struct ConnectionRegistry<W> {
    role: &'static str,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Entry<W>>>,
}

impl<W: AsyncWrite + Unpin> ConnectionRegistry<W> {
    /// `role` names the peers in log lines ("relay", "leaf").
    pub fn new(role: &'static str) -> Self {
        ConnectionRegistry {
            role,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a connection with nothing to send first.
    pub async fn add(&self, peer: impl Into<String>, writer: FrameWriter<W>) -> Registration {
        self.add_with_snapshot(peer, writer, || async { Vec::new() })
            .await
    }

    /// Registers a connection after writing it a snapshot.
    ///
    /// `snapshot` is evaluated under the registry lock, so any broadcast
    /// either happens before it (and is reflected in it) or reaches the new
    /// connection afterwards. A failed snapshot write stops the snapshot but
    /// the connection is still registered.
    pub async fn add_with_snapshot<F, Fut>(
        &self,
        peer: impl Into<String>,
        mut writer: FrameWriter<W>,
        snapshot: F,
    ) -> Registration
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<Vec<u8>>>,
    {
        let peer = peer.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let closed = Arc::new(Notify::new());

        let mut connections = self.connections.lock().await;

        let mut snapshot_result = Ok(0);
        for payload in snapshot().await {
            let sent = snapshot_result.as_ref().copied().unwrap_or(0);
            if let Err(e) = writer.write_frame(&payload).await {
                warn!(role = self.role, peer = %peer, error = %e, sent, "Snapshot push aborted");
                snapshot_result = Err(e);
                break;
            }
            snapshot_result = Ok(sent + 1);
        }

        connections.insert(
            id,
            Entry {
                peer: peer.clone(),
                writer,
                closed: closed.clone(),
            },
        );
        debug!(role = self.role, peer = %peer, id, total = connections.len(), "Connection registered");

        Registration {
            id,
            closed,
            snapshot: snapshot_result,
        }
    }

    /// Removes and closes a connection. Returns false if it was already gone.
    pub async fn remove_and_close(&self, id: ConnectionId) -> bool {
        let entry = self.connections.lock().await.remove(&id);
        match entry {
            Some(entry) => {
                debug!(role = self.role, peer = %entry.peer, id, "Connection removed");
                entry.close().await;
                true
            }
            None => false,
        }
    }

    /// Writes `payload` to every connection, evicting the ones that fail.
    pub async fn broadcast(&self, payload: &[u8]) -> BroadcastOutcome {
        let mut connections = self.connections.lock().await;
        let mut outcome = BroadcastOutcome::default();

        for (id, entry) in connections.iter_mut() {
            match entry.writer.write_frame(payload).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!(role = self.role, peer = %entry.peer, error = %e, "Broadcast write failed");
                    outcome.evicted.push(*id);
                }
            }
        }

        for id in &outcome.evicted {
            if let Some(entry) = connections.remove(id) {
                entry.close().await;
            }
        }

        outcome
    }

    /// Closes every connection (shutdown).
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Entry<W>> = self.connections.lock().await.drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            entry.close().await;
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
