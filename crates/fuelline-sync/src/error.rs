//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Connection    │  │     Codec               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Frame          │  │  Encode                 │ │
//! │  │  ConfigLoad     │  │  Connection     │  │  (bad inbound payloads  │ │
//! │  │  BindFailed     │  │  NotLinked      │  │  are logged and skipped │ │
//! │  │                 │  │                 │  │  by the read loop)      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Persistence   │  │    Internal     │  │     Domain              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  log it, leave  │  │  ChannelError   │  │  Core (sale rejected)   │ │
//! │  │  record unsynced│  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No error from one connection ever leaves that connection's task.

use thiserror::Error;

use crate::framer::FrameError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all node failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Listening socket could not be opened.
    #[error("Failed to bind {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    // =========================================================================
    // Connection Errors
    // =========================================================================
    /// Outbound connect refused or failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Framing failure; the stream is no longer usable.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No upstream link is currently established.
    #[error("Upstream link is down")]
    NotLinked,

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Encode failed: {0}")]
    Encode(String),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Persistence error: {0}")]
    Persistence(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A sale could not start (no cached price, or one already running).
    #[error(transparent)]
    Core(#[from] fuelline_core::CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<fuelline_db::DbError> for SyncError {
    fn from(err: fuelline_db::DbError) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Encode(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Frame(FrameError::Io(err))
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// The connection is gone: clean it up, and reconnect if a client.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::Frame(_)
                | SyncError::NotLinked
        )
    }

    /// The store failed; the record stays unsynced for the next pass.
    pub fn is_persistence_error(&self) -> bool {
        matches!(self, SyncError::Persistence(_))
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::BindFailed { .. }
        )
    }
}
