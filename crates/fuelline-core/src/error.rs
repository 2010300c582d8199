//! # Error Types
//!
//! Domain-specific error types for fuelline-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fuelline-core errors (this file)                                       │
//! │  ├── CoreError        - Domain rule violations                          │
//! │  └── ValidationError  - Admin input failures                            │
//! │                                                                         │
//! │  fuelline-db errors (separate crate)                                    │
//! │  └── DbError          - Persistence failures                            │
//! │                                                                         │
//! │  fuelline-sync errors (separate crate)                                  │
//! │  ├── FrameError       - Connection-level framing failures               │
//! │  ├── DecodeError      - Message-level codec failures                    │
//! │  └── SyncError        - Everything a node loop can hit                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sale was requested for a fuel type that has no cached price yet.
    ///
    /// The leaf abandons the attempt and stays idle.
    #[error("No price known for fuel type {0}")]
    UnknownPrice(String),

    /// A sale was requested while another one is still loading.
    #[error("A sale is already in progress")]
    SaleInProgress,
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised by the admin console before anything reaches a node.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g. a price that is not an integer).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::UnknownPrice("Kerosene".to_string());
        assert_eq!(err.to_string(), "No price known for fuel type Kerosene");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "fuel_type".to_string(),
        };
        assert_eq!(err.to_string(), "fuel_type is required");

        let err = ValidationError::OutOfRange {
            field: "base_price".to_string(),
            min: 1,
            max: 10,
        };
        assert_eq!(err.to_string(), "base_price must be between 1 and 10");
    }

    #[test]
    fn test_sale_in_progress_message() {
        assert_eq!(
            CoreError::SaleInProgress.to_string(),
            "A sale is already in progress"
        );
    }
}
