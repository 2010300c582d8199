//! # fuelline-core: Pure Domain Logic for Fuelline
//!
//! Everything the three node roles agree on that does not need I/O: what a
//! fuel type is, how a relay turns a base price into a final price, what a
//! completed sale looks like, and how a leaf reconciles incoming prices with
//! a sale that is already running.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Fuelline Architecture                            │
//! │                                                                         │
//! │     Hub ──PriceBaseUpdate──► Relay ──PriceLocalUpdate──► Leaf           │
//! │      ▲                         │  ▲                         │           │
//! │      └───TransactionReport─────┘  └────TransactionReport────┘           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ fuelline-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌─────────────┐  ┌──────────┐  │   │
//! │  │   │   types   │  │   price   │  │ operational │  │validation│  │   │
//! │  │   │ FuelType  │  │  Margin   │  │ PriceCache  │  │  admin   │  │   │
//! │  │   │Transaction│  │ final_px  │  │ Idle/Oper.  │  │  input   │  │   │
//! │  │   └───────────┘  └───────────┘  └─────────────┘  └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (FuelType, Transaction)
//! - [`price`] - Integer prices and the relay margin
//! - [`operational`] - The leaf's price cache and operational lock
//! - [`validation`] - Admin console input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use fuelline_core::price::{final_price, Margin};
//!
//! assert_eq!(final_price(1000), 1150);
//! assert_eq!(Margin::from_bps(11_500).apply(999), 1148);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod operational;
pub mod price;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use operational::{OperationalState, PriceCache, UpdateOutcome};
pub use price::{final_price, Margin, Price};
pub use types::{FuelType, Transaction};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Fuel types the admin console accepts.
///
/// The wire format carries fuel types as free-form strings; only operator
/// input is checked against this list.
pub const FUEL_CATALOGUE: [&str; 5] = ["93", "95", "97", "Diesel", "Kerosene"];

/// Every completed simulated sale counts as one load.
pub const LOADS_PER_SALE: u32 = 1;
