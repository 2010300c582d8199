//! # Prices and the Relay Margin
//!
//! Prices travel as whole integers in the smallest currency unit. A relay
//! turns a base price into a final price by applying a fixed margin and
//! flooring the result.
//!
//! ## Why Basis Points?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  float:   100 * 1.15 = 114.99999999999999  →  floor = 114   (wrong)     │
//! │  bps:     100 * 11500 / 10000 = 115                           (right)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//! 1 basis point = 1/10000, so ×1.15 is 11 500 bps. The product is taken in
//! `i128` and floored with `div_euclid`, which is exact for every `i64` base.

use serde::{Deserialize, Serialize};

/// A price in the smallest currency unit.
pub type Price = i64;

const BPS_SCALE: i128 = 10_000;

// =============================================================================
// Margin
// =============================================================================

/// Multiplicative margin expressed in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Margin(u32);

impl Margin {
    /// The relay margin: ×1.15.
    pub const RELAY: Margin = Margin(11_500);

    /// Creates a margin from basis points (10 000 = ×1.00).
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Margin(bps)
    }

    /// Returns the margin in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Applies the margin to `base` and floors the result.
    ///
    /// Results outside the `i64` range saturate.
    pub fn apply(&self, base: Price) -> Price {
        let scaled = (base as i128 * self.0 as i128).div_euclid(BPS_SCALE);
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as Price
    }
}

impl Default for Margin {
    fn default() -> Self {
        Margin::RELAY
    }
}

/// Final price a relay publishes for a given base price.
///
/// ```rust
/// use fuelline_core::final_price;
///
/// assert_eq!(final_price(1000), 1150);
/// assert_eq!(final_price(999), 1148);
/// ```
#[inline]
pub fn final_price(base: Price) -> Price {
    Margin::RELAY.apply(base)
}

// =============================================================================
// Unit Tests
// =============================================================================
