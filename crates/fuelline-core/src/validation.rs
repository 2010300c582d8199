//! # Validation Module
//!
//! Checks applied to operator input before it is handed to the hub.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Admin console (THIS MODULE)                                   │
//! │  ├── Fuel type must be in the catalogue                                 │
//! │  └── Price must be a positive integer                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Wire codec                                                    │
//! │  └── Required fields present, correct types                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  └── NOT NULL / CHECK constraints                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use fuelline_core::validation::{parse_base_price, parse_fuel_type};
//!
//! let fuel = parse_fuel_type("diesel").unwrap();
//! assert_eq!(fuel.as_str(), "Diesel");
//! assert_eq!(parse_base_price("1000").unwrap(), 1000);
//! ```

use crate::error::ValidationError;
use crate::price::Price;
use crate::types::FuelType;
use crate::FUEL_CATALOGUE;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Upper bound accepted for a base price from the console.
pub const MAX_BASE_PRICE: Price = 1_000_000_000;

/// Parses a fuel type against [`FUEL_CATALOGUE`].
///
/// Matching is case-insensitive; the result uses the catalogue spelling.
pub fn parse_fuel_type(input: &str) -> ValidationResult<FuelType> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ValidationError::Required {
            field: "fuel_type".to_string(),
        });
    }

    FUEL_CATALOGUE
        .iter()
        .find(|known| known.eq_ignore_ascii_case(input))
        .map(|known| FuelType::from(*known))
        .ok_or_else(|| ValidationError::NotAllowed {
            field: "fuel_type".to_string(),
            allowed: FUEL_CATALOGUE.iter().map(|s| s.to_string()).collect(),
        })
}

/// Parses a base price typed by the operator.
///
/// ## Rules
/// - Must be a whole number
/// - Must be between 1 and [`MAX_BASE_PRICE`]
pub fn parse_base_price(input: &str) -> ValidationResult<Price> {
    let input = input.trim();

    if input.is_empty() {
        return Err(ValidationError::Required {
            field: "base_price".to_string(),
        });
    }

    let price: Price = input.parse().map_err(|_| ValidationError::InvalidFormat {
        field: "base_price".to_string(),
        reason: "must be a whole number".to_string(),
    })?;

    if !(1..=MAX_BASE_PRICE).contains(&price) {
        return Err(ValidationError::OutOfRange {
            field: "base_price".to_string(),
            min: 1,
            max: MAX_BASE_PRICE,
        });
    }

    Ok(price)
}

/// Validates a node identifier (non-empty after trimming).
pub fn validate_node_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "node_id".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fuel_type() {
        assert_eq!(parse_fuel_type("95").unwrap().as_str(), "95");
        assert_eq!(parse_fuel_type("  KEROSENE ").unwrap().as_str(), "Kerosene");
        assert!(matches!(
            parse_fuel_type(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            parse_fuel_type("98"),
            Err(ValidationError::NotAllowed { .. })
        ));
    }

    #[test]
    fn test_parse_base_price() {
        assert_eq!(parse_base_price(" 1000 ").unwrap(), 1000);
        assert!(matches!(
            parse_base_price("10.5"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_base_price("abc"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_base_price("0"),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            parse_base_price("-5"),
            Err(ValidationError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_validate_node_id() {
        assert!(validate_node_id("relay-north").is_ok());
        assert!(validate_node_id("   ").is_err());
    }
}
