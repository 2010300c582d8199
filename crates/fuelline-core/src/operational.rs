//! # Operational Lock
//!
//! A leaf must never change a price under a sale that is already loading.
//! [`OperationalState`] holds the visible price cache together with the
//! operating flag and the queue of updates that arrived mid-sale, so a caller
//! can guard all three with a single lock.
//!
//! ## State Machine
//! ```text
//!                    begin_sale(F)  (F has a cached price)
//!        ┌──────────┐ ────────────────────────────► ┌─────────────┐
//!        │   Idle   │                               │  Operating  │
//!        │          │ ◄──────────────────────────── │             │
//!        └──────────┘   finish_sale(): apply every  └─────────────┘
//!             │         queued update, clear queue        │
//!             │                                           │
//!   update(F, p): cache[F] = p              update(F, p): pending[F] = p
//!                 pending.remove(F)                       (latest wins)
//! ```
//!
//! Invariant: `pending` is empty whenever the state is Idle.

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
use crate::price::Price;
use crate::types::FuelType;

// =============================================================================
// Price Cache
// =============================================================================

/// Current price per fuel type. Last write wins; no history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceCache {
    prices: HashMap<FuelType, Price>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the price for `fuel_type`, returning the previous one.
    pub fn set(&mut self, fuel_type: FuelType, price: Price) -> Option<Price> {
        self.prices.insert(fuel_type, price)
    }

    pub fn get(&self, fuel_type: &str) -> Option<Price> {
        self.prices.get(fuel_type).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// All entries ordered by fuel type.
    pub fn snapshot(&self) -> Vec<(FuelType, Price)> {
        let mut entries: Vec<_> = self
            .prices
            .iter()
            .map(|(fuel, price)| (fuel.clone(), *price))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

// =============================================================================
// Operational State
// =============================================================================

/// What happened to an incoming price update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The cache now shows the new price.
    Applied,
    /// A sale is loading; the price waits until it finishes.
    Queued,
}

/// Price cache, operating flag and pending updates as one unit.
#[derive(Debug, Default)]
pub struct OperationalState {
    cache: PriceCache,
    operating: bool,
    pending: HashMap<FuelType, Price>,
}

impl OperationalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an incoming price to the cache or to the pending queue.
    pub fn receive_update(&mut self, fuel_type: FuelType, price: Price) -> UpdateOutcome {
        if self.operating {
            self.pending.insert(fuel_type, price);
            UpdateOutcome::Queued
        } else {
            self.pending.remove(fuel_type.as_str());
            self.cache.set(fuel_type, price);
            UpdateOutcome::Applied
        }
    }

    /// Moves Idle → Operating for a sale of `fuel_type`.
    ///
    /// Returns the price the sale is charged at. Fails without changing
    /// state when the fuel type has no cached price or a sale is already
    /// running.
    pub fn begin_sale(&mut self, fuel_type: &str) -> CoreResult<Price> {
        if self.operating {
            return Err(CoreError::SaleInProgress);
        }
        let price = self
            .cache
            .get(fuel_type)
            .ok_or_else(|| CoreError::UnknownPrice(fuel_type.to_string()))?;
        self.operating = true;
        Ok(price)
    }

    /// Moves Operating → Idle, applying every queued update.
    ///
    /// Returns the updates that were applied, ordered by fuel type. Calling
    /// this while Idle does nothing.
    pub fn finish_sale(&mut self) -> Vec<(FuelType, Price)> {
        if !self.operating {
            return Vec::new();
        }
        self.operating = false;

        let mut applied: Vec<_> = self.pending.drain().collect();
        applied.sort_by(|a, b| a.0.cmp(&b.0));
        for (fuel, price) in &applied {
            self.cache.set(fuel.clone(), *price);
        }
        applied
    }

    pub fn is_operating(&self) -> bool {
        self.operating
    }

    /// The visible cache.
    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }

    /// Price waiting for `fuel_type`, if any.
    pub fn pending(&self, fuel_type: &str) -> Option<Price> {
        self.pending.get(fuel_type).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(prices: &[(&str, Price)]) -> OperationalState {
        let mut state = OperationalState::new();
        for (fuel, price) in prices {
            state.receive_update(FuelType::from(*fuel), *price);
        }
        state
    }

    #[test]
    fn test_idle_update_applies_immediately() {
        let mut state = OperationalState::new();
        let outcome = state.receive_update("93".into(), 900);

        assert_eq!(outcome, UpdateOutcome::Applied);
        assert_eq!(state.cache().get("93"), Some(900));
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_operating_updates_queue_latest_wins() {
        let mut state = state_with(&[("95", 1150)]);
        assert_eq!(state.begin_sale("95").unwrap(), 1150);

        assert_eq!(state.receive_update("95".into(), 1200), UpdateOutcome::Queued);
        assert_eq!(state.receive_update("95".into(), 1300), UpdateOutcome::Queued);

        // Visible cache untouched while loading
        assert_eq!(state.cache().get("95"), Some(1150));
        assert_eq!(state.pending("95"), Some(1300));
        assert_eq!(state.pending_count(), 1);

        let applied = state.finish_sale();
        assert_eq!(applied, vec![(FuelType::from("95"), 1300)]);
        assert_eq!(state.cache().get("95"), Some(1300));
        assert!(!state.is_operating());
        assert_eq!(state.pending_count(), 0);
    }

    #[test]
    fn test_queued_update_for_other_fuel_applied_after_sale() {
        let mut state = state_with(&[("95", 1150)]);
        state.begin_sale("95").unwrap();

        state.receive_update("Diesel".into(), 800);
        assert_eq!(state.cache().get("Diesel"), None);

        state.finish_sale();
        assert_eq!(state.cache().get("Diesel"), Some(800));
    }

    #[test]
    fn test_begin_sale_without_price_keeps_idle() {
        let mut state = OperationalState::new();
        let err = state.begin_sale("97").unwrap_err();

        assert!(matches!(err, CoreError::UnknownPrice(ref f) if f == "97"));
        assert!(!state.is_operating());
    }

    #[test]
    fn test_begin_sale_twice_is_rejected() {
        let mut state = state_with(&[("95", 1150)]);
        state.begin_sale("95").unwrap();
        assert!(matches!(state.begin_sale("95"), Err(CoreError::SaleInProgress)));
        assert!(state.is_operating());
    }

    #[test]
    fn test_finish_sale_while_idle_is_noop() {
        let mut state = state_with(&[("95", 1150)]);
        assert!(state.finish_sale().is_empty());
        assert_eq!(state.cache().get("95"), Some(1150));
    }

    #[test]
    fn test_pending_empty_whenever_idle() {
        let mut state = state_with(&[("93", 900), ("95", 1150)]);
        state.begin_sale("93").unwrap();
        state.receive_update("93".into(), 950);
        state.receive_update("95".into(), 1200);
        state.finish_sale();

        assert!(!state.is_operating());
        assert_eq!(state.pending_count(), 0);
        assert_eq!(state.cache().get("93"), Some(950));
        assert_eq!(state.cache().get("95"), Some(1200));
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let mut cache = PriceCache::new();
        cache.set("97".into(), 3);
        cache.set("93".into(), 1);
        cache.set("95".into(), 2);

        let fuels: Vec<_> = cache.snapshot().into_iter().map(|(f, _)| f.into_inner()).collect();
        assert_eq!(fuels, vec!["93", "95", "97"]);
        assert_eq!(cache.set("93".into(), 10), Some(1));
        assert_eq!(cache.len(), 3);
    }
}
