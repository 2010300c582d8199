//! # Repository Module
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Node                                                                   │
//! │       │  db.outbox().append(&tx)                                        │
//! │       ▼                                                                 │
//! │  OutboxRepository                LedgerRepository                       │
//! │  ├── append(&tx) → id            ├── record(&tx) → id                   │
//! │  ├── mark_synced(id)             ├── totals_by_fuel_type()              │
//! │  ├── list_unsynced()             ├── totals_by_relay()                  │
//! │  └── count_unsynced()            └── count()                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`OutboxRepository`](outbox::OutboxRepository) - Relay retry queue
//! - [`LedgerRepository`](ledger::LedgerRepository) - Hub central store

pub mod ledger;
pub mod outbox;
