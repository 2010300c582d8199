//! # Store Seam
//!
//! What the nodes need from persistence, and nothing more. Relays use a
//! [`TransactionStore`] as their outbox; the hub uses a [`LedgerStore`].
//!
//! ```text
//! ┌──────────────┐   append / mark_synced / list_unsynced   ┌──────────────┐
//! │  RelayNode   │ ───────────────────────────────────────► │              │
//! └──────────────┘                                          │  Database    │
//! ┌──────────────┐   record / totals_by_fuel_type / ...     │  (SQLite)    │
//! │  HubServer   │ ───────────────────────────────────────► │  MemoryStore │
//! └──────────────┘                                          └──────────────┘
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{SyncError, SyncResult};
use fuelline_core::Transaction;
use fuelline_db::{Database, FuelTotals, OutboxRecord, RelayTotals};

// =============================================================================
// Traits
// =============================================================================

/// Durable retry queue of transaction reports.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persists a report unsynced and returns its id.
    async fn append(&self, transaction: &Transaction) -> SyncResult<i64>;

    /// Flags a record as forwarded. Never reverts.
    async fn mark_synced(&self, id: i64) -> SyncResult<()>;

    /// All unsynced records, ascending id.
    async fn list_unsynced(&self) -> SyncResult<Vec<OutboxRecord>>;

    async fn count_unsynced(&self) -> SyncResult<i64>;

    /// Deletes records synced more than `days_old` days ago. Unsynced
    /// records are never touched.
    async fn cleanup_synced(&self, days_old: u32) -> SyncResult<u64>;
}

/// Central record of every report that reached the hub.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn record(&self, transaction: &Transaction) -> SyncResult<i64>;

    async fn totals_by_fuel_type(&self) -> SyncResult<Vec<FuelTotals>>;

    async fn totals_by_relay(&self) -> SyncResult<Vec<RelayTotals>>;
}

// =============================================================================
// SQLite
// =============================================================================

#[async_trait]
impl TransactionStore for Database {
    async fn append(&self, transaction: &Transaction) -> SyncResult<i64> {
        Ok(self.outbox().append(transaction).await?)
    }

    async fn mark_synced(&self, id: i64) -> SyncResult<()> {
        Ok(self.outbox().mark_synced(id).await?)
    }

    async fn list_unsynced(&self) -> SyncResult<Vec<OutboxRecord>> {
        Ok(self.outbox().list_unsynced().await?)
    }

    async fn count_unsynced(&self) -> SyncResult<i64> {
        Ok(self.outbox().count_unsynced().await?)
    }

    async fn cleanup_synced(&self, days_old: u32) -> SyncResult<u64> {
        Ok(self.outbox().cleanup_synced(days_old).await?)
    }
}

#[async_trait]
impl LedgerStore for Database {
    async fn record(&self, transaction: &Transaction) -> SyncResult<i64> {
        Ok(self.ledger().record(transaction).await?)
    }

    async fn totals_by_fuel_type(&self) -> SyncResult<Vec<FuelTotals>> {
        Ok(self.ledger().totals_by_fuel_type().await?)
    }

    async fn totals_by_relay(&self) -> SyncResult<Vec<RelayTotals>> {
        Ok(self.ledger().totals_by_relay().await?)
    }
}

// =============================================================================
// In-Memory
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    outbox: Vec<OutboxRecord>,
    ledger: Vec<Transaction>,
}

/// Store kept in process memory.
///
/// Implements both traits. Failures can be switched on to exercise the
/// persistence error paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_appends: AtomicBool,
    fail_marks: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `append` and `record` fail until switched off.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Makes `mark_synced` fail until switched off.
    pub fn set_fail_marks(&self, fail: bool) {
        self.fail_marks.store(fail, Ordering::SeqCst);
    }

    /// Copy of every outbox record, synced or not.
    pub fn outbox_records(&self) -> Vec<OutboxRecord> {
        self.lock().outbox.clone()
    }

    /// Copy of every ledger entry, in arrival order.
    pub fn ledger_entries(&self) -> Vec<Transaction> {
        self.lock().ledger.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(flag: &AtomicBool, operation: &str) -> SyncResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(SyncError::Persistence(format!("{} unavailable", operation)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn append(&self, transaction: &Transaction) -> SyncResult<i64> {
        Self::check(&self.fail_appends, "append")?;
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.outbox.push(OutboxRecord {
            id,
            transaction: transaction.clone(),
            synced: false,
            created_at: Utc::now(),
            synced_at: None,
        });
        Ok(id)
    }

    async fn mark_synced(&self, id: i64) -> SyncResult<()> {
        Self::check(&self.fail_marks, "mark_synced")?;
        let mut inner = self.lock();
        let record = inner
            .outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::Persistence(format!("outbox record {} not found", id)))?;
        if !record.synced {
            record.synced = true;
            record.synced_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_unsynced(&self) -> SyncResult<Vec<OutboxRecord>> {
        Ok(self
            .lock()
            .outbox
            .iter()
            .filter(|r| !r.synced)
            .cloned()
            .collect())
    }

    async fn count_unsynced(&self) -> SyncResult<i64> {
        Ok(self.lock().outbox.iter().filter(|r| !r.synced).count() as i64)
    }

    async fn cleanup_synced(&self, days_old: u32) -> SyncResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_old));
        let mut inner = self.lock();
        let before = inner.outbox.len();
        inner
            .outbox
            .retain(|r| !(r.synced && r.synced_at.is_some_and(|at| at < cutoff)));
        Ok((before - inner.outbox.len()) as u64)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn record(&self, transaction: &Transaction) -> SyncResult<i64> {
        Self::check(&self.fail_appends, "record")?;
        let mut inner = self.lock();
        inner.ledger.push(transaction.clone());
        Ok(inner.ledger.len() as i64)
    }

    async fn totals_by_fuel_type(&self) -> SyncResult<Vec<FuelTotals>> {
        let mut totals: BTreeMap<String, (f64, i64, i64)> = BTreeMap::new();
        for tx in self.lock().ledger.iter() {
            let entry = totals.entry(tx.fuel_type.to_string()).or_default();
            entry.0 += tx.litres;
            entry.1 += i64::from(tx.loads);
            entry.2 += 1;
        }
        Ok(totals
            .into_iter()
            .map(|(fuel_type, (litres, loads, reports))| FuelTotals {
                fuel_type,
                litres,
                loads,
                reports,
            })
            .collect())
    }

    async fn totals_by_relay(&self) -> SyncResult<Vec<RelayTotals>> {
        // None sorts first, as NULL does in SQLite
        let mut totals: BTreeMap<Option<String>, (f64, i64, i64)> = BTreeMap::new();
        for tx in self.lock().ledger.iter() {
            let entry = totals.entry(tx.relay_id.clone()).or_default();
            entry.0 += tx.litres;
            entry.1 += i64::from(tx.loads);
            entry.2 += 1;
        }
        Ok(totals
            .into_iter()
            .map(|(relay_id, (litres, loads, reports))| RelayTotals {
                relay_id,
                litres,
                loads,
                reports,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fuelline_db::DbConfig;

    #[tokio::test]
    async fn test_memory_outbox() {
        let store = MemoryStore::new();
        let a = store.append(&Transaction::new("leaf-1", "95", 10.0)).await.unwrap();
        let b = store.append(&Transaction::new("leaf-2", "93", 20.0)).await.unwrap();
        assert!(a < b);

        store.mark_synced(a).await.unwrap();
        let unsynced = store.list_unsynced().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, b);
        assert_eq!(store.count_unsynced().await.unwrap(), 1);

        assert!(store.mark_synced(99).await.unwrap_err().is_persistence_error());
    }

    #[tokio::test]
    async fn test_memory_cleanup_keeps_unsynced() {
        let store = MemoryStore::new();
        let a = store.append(&Transaction::new("leaf-1", "95", 10.0)).await.unwrap();
        store.append(&Transaction::new("leaf-1", "95", 11.0)).await.unwrap();
        store.mark_synced(a).await.unwrap();

        // Synced just now: inside a one-day window
        assert_eq!(store.cleanup_synced(1).await.unwrap(), 0);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.cleanup_synced(0).await.unwrap(), 1);

        let left = store.outbox_records();
        assert_eq!(left.len(), 1);
        assert!(!left[0].synced);
        assert_eq!(store.cleanup_synced(0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_failure_switches() {
        let store = MemoryStore::new();
        store.set_fail_appends(true);
        let err = store
            .append(&Transaction::new("leaf-1", "95", 1.0))
            .await
            .unwrap_err();
        assert!(err.is_persistence_error());

        store.set_fail_appends(false);
        let id = store.append(&Transaction::new("leaf-1", "95", 1.0)).await.unwrap();

        store.set_fail_marks(true);
        assert!(store.mark_synced(id).await.is_err());
        assert_eq!(store.count_unsynced().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_ledger_totals() {
        let store = MemoryStore::new();
        for tx in [
            Transaction::new("leaf-1", "95", 10.5).stamped("relay-b"),
            Transaction::new("leaf-2", "95", 4.5).stamped("relay-a"),
            Transaction::new("leaf-3", "Diesel", 30.0).stamped("relay-a"),
            Transaction::new("leaf-4", "93", 1.0),
        ] {
            LedgerStore::record(&store, &tx).await.unwrap();
        }

        let by_fuel = store.totals_by_fuel_type().await.unwrap();
        let fuels: Vec<&str> = by_fuel.iter().map(|t| t.fuel_type.as_str()).collect();
        assert_eq!(fuels, vec!["93", "95", "Diesel"]);
        assert_eq!(by_fuel[1].litres, 15.0);
        assert_eq!(by_fuel[1].loads, 2);

        let by_relay = store.totals_by_relay().await.unwrap();
        assert_eq!(by_relay[0].relay_id, None);
        assert_eq!(by_relay[1].relay_id.as_deref(), Some("relay-a"));
        assert_eq!(by_relay[1].reports, 2);
    }

    #[tokio::test]
    async fn test_database_behind_traits() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let outbox: &dyn TransactionStore = &db;
        let id = outbox
            .append(&Transaction::new("leaf-1", "97", 12.25).stamped("relay-1"))
            .await
            .unwrap();
        assert_eq!(outbox.count_unsynced().await.unwrap(), 1);
        outbox.mark_synced(id).await.unwrap();
        assert!(outbox.list_unsynced().await.unwrap().is_empty());
        assert_eq!(outbox.cleanup_synced(1).await.unwrap(), 0);

        let ledger: &dyn LedgerStore = &db;
        ledger
            .record(&Transaction::new("leaf-1", "97", 12.25).stamped("relay-1"))
            .await
            .unwrap();
        let totals = ledger.totals_by_fuel_type().await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].litres, 12.25);
    }
}
