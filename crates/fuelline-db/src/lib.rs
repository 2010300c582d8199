//! # fuelline-db: Database Layer for Fuelline
//!
//! SQLite storage for the two places a sale report comes to rest: the relay's
//! outbox, where it waits until the hub has it, and the hub's ledger.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fuelline Report Path                             │
//! │                                                                         │
//! │  Leaf ──TransactionReport──► Relay ─────────────────────► Hub           │
//! │                                │                           │            │
//! │                                ▼                           ▼            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   fuelline-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌──────────────┐   │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations  │   │   │
//! │  │   │   (pool.rs)   │    │                │   │  (embedded)  │   │   │
//! │  │   │               │    │ OutboxRepo     │   │              │   │   │
//! │  │   │ SqlitePool    │◄───│ LedgerRepo     │   │ 001_init.sql │   │   │
//! │  │   └───────────────┘    └────────────────┘   └──────────────┘   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Outbox and ledger repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fuelline_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("relay.db")).await?;
//! let id = db.outbox().append(&transaction).await?;
//! db.outbox().mark_synced(id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::ledger::{FuelTotals, LedgerRepository, RelayTotals};
pub use repository::outbox::{OutboxRecord, OutboxRepository};
