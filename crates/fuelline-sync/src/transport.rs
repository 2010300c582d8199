//! # TCP Transport
//!
//! Socket plumbing shared by the three node roles: splitting a stream into
//! framed halves, the per-connection read loop, and the upstream [`Link`]
//! slot used by relays (to the hub) and leaves (to their relay).
//!
//! ## Upstream Link Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Upstream Link States                                │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐                          │
//! │  │  Down      │ ──────────────► │ install()  │ established = true       │
//! │  └────────────┘                 └─────┬──────┘                          │
//! │        ▲                              │                                 │
//! │        │                              ▼                                 │
//! │        │                       read_loop() until EOF,                   │
//! │        │                       frame error, or eviction                 │
//! │        │                              │                                 │
//! │        │                              ▼                                 │
//! │        │                       ┌────────────┐                           │
//! │        └────── fixed delay ─── │ teardown() │ established = false       │
//! │                                └────────────┘                           │
//! │                                                                         │
//! │  A failed send also tears the link down and wakes the read loop.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::framer::{FrameError, FrameReader, FrameWriter};
use crate::protocol::{DecodeError, Message};

/// Pause after a failed accept before trying again.
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Read half of a framed TCP connection.
pub type TcpFrameReader = FrameReader<OwnedReadHalf>;

/// Write half of a framed TCP connection.
pub type TcpFrameWriter = FrameWriter<OwnedWriteHalf>;

/// Splits an accepted or connected stream into framed halves.
pub fn split_stream(stream: TcpStream, max_frame_len: usize) -> (TcpFrameReader, TcpFrameWriter) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Could not set TCP_NODELAY");
    }
    let (read, write) = stream.into_split();
    (
        FrameReader::with_max_frame_len(read, max_frame_len),
        FrameWriter::new(write),
    )
}

/// Opens an outbound connection.
pub async fn connect(addr: &str, max_frame_len: usize) -> SyncResult<(TcpFrameReader, TcpFrameWriter)> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SyncError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    Ok(split_stream(stream, max_frame_len))
}

// =============================================================================
// Message-Level Helpers
// =============================================================================

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encodes and writes one message.
    pub async fn send_message(&mut self, message: &Message) -> SyncResult<()> {
        let payload = message.encode()?;
        self.write_frame(&payload).await?;
        Ok(())
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Reads the next frame and decodes it.
    ///
    /// The outer error ends the connection; the inner one only drops the
    /// message.
    pub async fn recv_message(&mut self) -> Result<Option<Result<Message, DecodeError>>, FrameError> {
        Ok(self
            .read_frame()
            .await?
            .map(|payload| Message::decode(&payload)))
    }
}

// =============================================================================
// Read Loop
// =============================================================================

/// Why a read loop ended.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Peer closed cleanly between frames.
    Closed,
    /// Framing or I/O failure.
    Failed(FrameError),
    /// Another task closed the connection.
    Evicted,
}

impl std::fmt::Display for ReadOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadOutcome::Closed => write!(f, "closed by peer"),
            ReadOutcome::Failed(e) => write!(f, "failed: {}", e),
            ReadOutcome::Evicted => write!(f, "closed locally"),
        }
    }
}

/// Reads and dispatches messages until the connection ends.
///
/// Messages are handled one at a time in arrival order. Undecodable
/// payloads are logged and skipped. `closed` is notified by whoever evicts
/// the connection.
pub async fn read_loop<R, F, Fut>(
    reader: &mut FrameReader<R>,
    closed: &Notify,
    peer: &str,
    mut on_message: F,
) -> ReadOutcome
where
    R: AsyncRead + Unpin,
    F: FnMut(Message) -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.notified() => return ReadOutcome::Evicted,
            next = reader.recv_message() => next,
        };

        match next {
            Ok(Some(Ok(message))) => {
                debug!(peer, kind = message.type_name(), "Received message");
                on_message(message).await;
            }
            Ok(Some(Err(e))) => {
                warn!(peer, error = %e, "Dropping undecodable message");
            }
            Ok(None) => return ReadOutcome::Closed,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
}

// =============================================================================
// Upstream Link
// =============================================================================

struct ActiveLink<W> {
    writer: FrameWriter<W>,
    closed: Arc<Notify>,
}

/// The single outbound connection of a relay or leaf.
///
/// The writer sits behind its own lock; the established flag is read
/// without it.
pub struct Link<W> {
    active: Mutex<Option<ActiveLink<W>>>,
    established: AtomicBool,
}

impl<W: AsyncWrite + Unpin> Link<W> {
    pub fn new() -> Self {
        Link {
            active: Mutex::new(None),
            established: AtomicBool::new(false),
        }
    }

    /// Stores a freshly connected writer and marks the link established.
    ///
    /// Returns the notifier the connection's read loop must watch.
    pub async fn install(&self, writer: FrameWriter<W>) -> Arc<Notify> {
        let closed = Arc::new(Notify::new());
        let previous = self.active.lock().await.replace(ActiveLink {
            writer,
            closed: closed.clone(),
        });
        self.established.store(true, Ordering::Release);

        if let Some(mut previous) = previous {
            previous.closed.notify_one();
            let _ = previous.writer.shutdown().await;
        }
        closed
    }

    pub fn is_established(&self) -> bool {
        self.established.load(Ordering::Acquire)
    }

    /// Sends one message upstream.
    ///
    /// Fails fast with [`SyncError::NotLinked`] while the link is down. A
    /// write failure tears the link down.
    pub async fn send(&self, message: &Message) -> SyncResult<()> {
        if !self.is_established() {
            return Err(SyncError::NotLinked);
        }
        let payload = message.encode()?;

        let mut active = self.active.lock().await;
        let link = active.as_mut().ok_or(SyncError::NotLinked)?;
        match link.writer.write_frame(&payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.established.store(false, Ordering::Release);
                if let Some(mut dead) = active.take() {
                    dead.closed.notify_one();
                    let _ = dead.writer.shutdown().await;
                }
                Err(e.into())
            }
        }
    }

    /// Clears the flag and closes the current connection, if any.
    pub async fn teardown(&self) {
        self.established.store(false, Ordering::Release);
        let taken = self.active.lock().await.take();
        if let Some(mut link) = taken {
            link.closed.notify_one();
            let _ = link.writer.shutdown().await;
        }
    }
}

impl<W: AsyncWrite + Unpin> Default for Link<W> {
    fn default() -> Self {
        Self::new()
    }
}
