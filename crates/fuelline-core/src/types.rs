//! # Domain Types
//!
//! Core domain types shared by every tier.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌──────────────────────────┐                     │
//! │  │    FuelType     │   │       Transaction        │                     │
//! │  │  ─────────────  │   │  ──────────────────────  │                     │
//! │  │  "93" "95" "97" │   │  leaf_id                 │                     │
//! │  │  "Diesel"       │   │  fuel_type               │                     │
//! │  │  "Kerosene"     │   │  litres (f64)            │                     │
//! │  │  (any on wire)  │   │  loads                   │                     │
//! │  └─────────────────┘   │  relay_id (stamped)      │                     │
//! │                        └──────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Fuel Type
// =============================================================================

/// A fuel label such as `"95"` or `"Diesel"`.
///
/// Serialized as a bare string. Any string is a valid fuel type on the wire;
/// see [`crate::validation::parse_fuel_type`] for the admin-side catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuelType(String);

impl FuelType {
    /// Creates a fuel type from any label.
    pub fn new(label: impl Into<String>) -> Self {
        FuelType(label.into())
    }

    /// Returns the label.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the fuel type, returning the label.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FuelType {
    fn from(label: &str) -> Self {
        FuelType(label.to_string())
    }
}

impl From<String> for FuelType {
    fn from(label: String) -> Self {
        FuelType(label)
    }
}

impl Borrow<str> for FuelType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for FuelType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// Immutable snapshot of one completed sale.
///
/// Created by a leaf with `relay_id` unset; the relay stamps its own id
/// before persisting and forwarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Leaf that performed the sale.
    pub leaf_id: String,

    /// Fuel dispensed.
    pub fuel_type: FuelType,

    /// Litres dispensed.
    pub litres: f64,

    /// Number of loads (always 1 for a simulated sale).
    pub loads: u32,

    /// Relay that accepted the report, once stamped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_id: Option<String>,
}

impl Transaction {
    /// Creates an unstamped transaction for a single load.
    pub fn new(leaf_id: impl Into<String>, fuel_type: impl Into<FuelType>, litres: f64) -> Self {
        Self {
            leaf_id: leaf_id.into(),
            fuel_type: fuel_type.into(),
            litres,
            loads: crate::LOADS_PER_SALE,
            relay_id: None,
        }
    }

    /// Returns a copy carrying `relay_id`, overwriting any previous stamp.
    pub fn stamped(mut self, relay_id: impl Into<String>) -> Self {
        self.relay_id = Some(relay_id.into());
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_fuel_type_serializes_as_bare_string() {
        let fuel = FuelType::from("Diesel");
        assert_eq!(serde_json::to_string(&fuel).unwrap(), "\"Diesel\"");

        let back: FuelType = serde_json::from_str("\"93\"").unwrap();
        assert_eq!(back.as_str(), "93");
    }

    #[test]
    fn test_fuel_type_map_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(FuelType::from("95"), 1150);
        assert_eq!(map.get("95"), Some(&1150));
        assert_eq!(map.get("97"), None);
    }

    #[test]
    fn test_transaction_defaults_to_one_load() {
        let tx = Transaction::new("leaf-1", "95", 20.5);
        assert_eq!(tx.loads, 1);
        assert!(tx.relay_id.is_none());
    }

    #[test]
    fn test_stamp_sets_relay_id() {
        let tx = Transaction::new("leaf-1", "95", 20.5).stamped("relay-a");
        assert_eq!(tx.relay_id.as_deref(), Some("relay-a"));

        let restamped = tx.stamped("relay-b");
        assert_eq!(restamped.relay_id.as_deref(), Some("relay-b"));
    }

    #[test]
    fn test_unstamped_transaction_omits_relay_id() {
        let tx = Transaction::new("leaf-1", "95", 1.0);
        let json = serde_json::to_value(&tx).unwrap();
        assert!(json.get("relay_id").is_none());

        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
