//! # fuelline-sync: Wire Protocol and Node Roles for Fuelline
//!
//! Everything that owns a socket. Prices flow down from the hub through the
//! relays to the leaves; sale reports flow back up, surviving any number of
//! link outages on the way.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fuelline Node Topology                           │
//! │                                                                         │
//! │                         ┌────────────────┐                              │
//! │                         │   HubServer    │  base prices, sales ledger   │
//! │                         └───────┬────────┘                              │
//! │            PriceBaseUpdate ▼    │    ▲ TransactionReport                │
//! │                 ┌───────────────┴───────────────┐                       │
//! │         ┌───────┴────────┐             ┌────────┴───────┐               │
//! │         │   RelayNode    │             │   RelayNode    │  margin,      │
//! │         │                │             │                │  outbox,      │
//! │         └───────┬────────┘             └────────┬───────┘  sync pass    │
//! │    PriceLocalUpdate ▼  ▲ TransactionReport      │                       │
//! │         ┌───────┴──────┐               ┌────────┴──────┐                │
//! │         │   LeafNode   │               │   LeafNode    │  operational   │
//! │         └──────────────┘               └───────────────┘  lock, sales   │
//! │                                                                         │
//! │  Every hop: [u32 big-endian length][JSON tagged message]                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Wire
//! - [`framer`] - Length-prefixed framing over any async byte stream
//! - [`protocol`] - The four message variants and their JSON codec
//! - [`transport`] - TCP halves, the read loop, and the upstream link slot
//! - [`registry`] - Downstream connection set with deferred eviction
//!
//! ### Nodes
//! - [`hub`] - Top tier server
//! - [`relay`] - Middle tier server and hub client
//! - [`leaf`] - Bottom tier client and sale simulation
//!
//! ### Support
//! - [`store`] - Persistence traits and an in-memory store
//! - [`config`] - Layered node configuration
//! - [`activity`] - Recent activity ring for the admin display
//! - [`status`] - Node status snapshot
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use fuelline_sync::{NodeConfig, RelayConfig, RelayNode};
//! use fuelline_db::{Database, DbConfig};
//!
//! let config = NodeConfig::load(None)?;
//! let db = Database::new(DbConfig::new("relay.db")).await?;
//!
//! let relay = RelayNode::new(RelayConfig::from_node_config(&config), Arc::new(db))
//!     .start()
//!     .await?;
//!
//! println!("{}", relay.status().await);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Wire
pub mod framer;
pub mod protocol;
pub mod registry;
pub mod transport;

// Nodes
pub mod hub;
pub mod leaf;
pub mod relay;

// Support
pub mod activity;
pub mod config;
pub mod error;
pub mod status;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use activity::{ActivityEntry, ActivityLog};
pub use config::{NodeConfig, NodeRole};
pub use error::{SyncError, SyncResult};
pub use framer::{encode_frame, FrameError, FrameReader, FrameWriter};
pub use protocol::{DecodeError, Message, MessageKind};
pub use registry::{BroadcastOutcome, ConnectionRegistry};
pub use status::NodeStatus;
pub use store::{LedgerStore, MemoryStore, TransactionStore};
pub use transport::Link;

pub use hub::{HubConfig, HubHandle, HubServer};
pub use leaf::{LeafConfig, LeafHandle, LeafNode, SaleReceipt, SaleSimulation};
pub use relay::{RelayConfig, RelayHandle, RelayNode, SyncPassSummary};
