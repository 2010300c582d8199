//! # Transaction Outbox Repository
//!
//! The relay's durable retry queue.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LEAF REPORT ARRIVES                                                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  1. INSERT INTO transaction_outbox (...) → id      (synced = 0)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  2. Forward to hub                                                      │
//! │       ├── ok:     UPDATE ... SET synced = 1 WHERE id = ?                │
//! │       └── failed: leave it                                              │
//! │                                                                         │
//! │  SYNC PASS (after every reconnect)                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SELECT * FROM transaction_outbox WHERE synced = 0 ORDER BY id          │
//! │  forward each in order, mark each, stop at the first failure            │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                        │
//! │  • A report is on disk before the relay tries the hub                   │
//! │  • synced only moves 0 → 1                                              │
//! │  • Delivery is at-least-once                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use fuelline_core::{FuelType, Transaction};

/// A persisted transaction report.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Monotonically increasing, assigned on append.
    pub id: i64,
    pub transaction: Transaction,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    leaf_id: String,
    fuel_type: String,
    litres: f64,
    loads: i64,
    relay_id: Option<String>,
    synced: bool,
    created_at: DateTime<Utc>,
    synced_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        OutboxRecord {
            id: row.id,
            transaction: Transaction {
                leaf_id: row.leaf_id,
                fuel_type: FuelType::from(row.fuel_type),
                litres: row.litres,
                loads: u32::try_from(row.loads).unwrap_or(0),
                relay_id: row.relay_id,
            },
            synced: row.synced,
            created_at: row.created_at,
            synced_at: row.synced_at,
        }
    }
}

/// Repository for outbox operations.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Persists a report as unsynced and returns its id.
    pub async fn append(&self, transaction: &Transaction) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transaction_outbox (
                leaf_id, fuel_type, litres, loads, relay_id, synced, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            "#,
        )
        .bind(&transaction.leaf_id)
        .bind(transaction.fuel_type.as_str())
        .bind(transaction.litres)
        .bind(i64::from(transaction.loads))
        .bind(&transaction.relay_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, leaf_id = %transaction.leaf_id, "Report appended to outbox");
        Ok(id)
    }

    /// Marks a record as forwarded.
    ///
    /// Marking an already-synced record keeps its original `synced_at`.
    pub async fn mark_synced(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_outbox SET
                synced = 1,
                synced_at = COALESCE(synced_at, ?2)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Outbox record", id));
        }
        Ok(())
    }

    /// All unsynced records, oldest (lowest id) first.
    pub async fn list_unsynced(&self) -> DbResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, leaf_id, fuel_type, litres, loads, relay_id,
                   synced, created_at, synced_at
            FROM transaction_outbox
            WHERE synced = 0
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    /// Fetches one record by id.
    pub async fn get(&self, id: i64) -> DbResult<OutboxRecord> {
        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, leaf_id, fuel_type, litres, loads, relay_id,
                   synced, created_at, synced_at
            FROM transaction_outbox
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::not_found("Outbox record", id))?;

        Ok(row.into())
    }

    /// Counts unsynced records.
    pub async fn count_unsynced(&self) -> DbResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transaction_outbox WHERE synced = 0")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Deletes records synced more than `days_old` days ago.
    ///
    /// Returns the number of deleted records.
    pub async fn cleanup_synced(&self, days_old: u32) -> DbResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));

        let result = sqlx::query(
            r#"
            DELETE FROM transaction_outbox
            WHERE synced = 1
            AND synced_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
