//! # Sales Ledger Repository
//!
//! Hub-side central store. Every report a relay forwards lands here once per
//! delivery; a report retried after a lost acknowledgment lands twice.

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use fuelline_core::Transaction;

/// Litres and loads sold for one fuel type.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct FuelTotals {
    pub fuel_type: String,
    pub litres: f64,
    pub loads: i64,
    pub reports: i64,
}

/// Litres and loads forwarded by one relay.
///
/// `relay_id` is `None` for reports that reached the hub unstamped.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RelayTotals {
    pub relay_id: Option<String>,
    pub litres: f64,
    pub loads: i64,
    pub reports: i64,
}

/// Repository for ledger operations.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LedgerRepository { pool }
    }

    /// Records a received report and returns its ledger id.
    pub async fn record(&self, transaction: &Transaction) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sales_ledger (
                leaf_id, relay_id, fuel_type, litres, loads, received_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&transaction.leaf_id)
        .bind(&transaction.relay_id)
        .bind(transaction.fuel_type.as_str())
        .bind(transaction.litres)
        .bind(i64::from(transaction.loads))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            id,
            leaf_id = %transaction.leaf_id,
            relay_id = ?transaction.relay_id,
            "Report recorded in ledger"
        );
        Ok(id)
    }

    /// Totals per fuel type, ordered by fuel type.
    pub async fn totals_by_fuel_type(&self) -> DbResult<Vec<FuelTotals>> {
        let rows = sqlx::query_as::<_, FuelTotals>(
            r#"
            SELECT fuel_type,
                   TOTAL(litres)  AS litres,
                   SUM(loads)     AS loads,
                   COUNT(*)       AS reports
            FROM sales_ledger
            GROUP BY fuel_type
            ORDER BY fuel_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Totals per relay, ordered by relay id (unstamped first).
    pub async fn totals_by_relay(&self) -> DbResult<Vec<RelayTotals>> {
        let rows = sqlx::query_as::<_, RelayTotals>(
            r#"
            SELECT relay_id,
                   TOTAL(litres)  AS litres,
                   SUM(loads)     AS loads,
                   COUNT(*)       AS reports
            FROM sales_ledger
            GROUP BY relay_id
            ORDER BY relay_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Number of reports recorded.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sales_ledger")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};
    use fuelline_core::Transaction;

    #[tokio::test]
    async fn test_totals_by_fuel_type() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger();

        ledger
            .record(&Transaction::new("l1", "95", 10.25).stamped("r1"))
            .await
            .unwrap();
        ledger
            .record(&Transaction::new("l2", "95", 4.75).stamped("r2"))
            .await
            .unwrap();
        ledger
            .record(&Transaction::new("l1", "Diesel", 30.0).stamped("r1"))
            .await
            .unwrap();

        let totals = ledger.totals_by_fuel_type().await.unwrap();
        assert_eq!(totals.len(), 2);
        assert_eq!(totals[0].fuel_type, "95");
        assert_eq!(totals[0].litres, 15.0);
        assert_eq!(totals[0].loads, 2);
        assert_eq!(totals[0].reports, 2);
        assert_eq!(totals[1].fuel_type, "Diesel");
        assert_eq!(ledger.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_totals_by_relay_groups_unstamped() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = db.ledger();

        ledger
            .record(&Transaction::new("l1", "93", 1.0).stamped("north"))
            .await
            .unwrap();
        ledger
            .record(&Transaction::new("l2", "93", 2.0))
            .await
            .unwrap();

        let totals = ledger.totals_by_relay().await.unwrap();
        assert_eq!(totals.len(), 2);
        // NULL sorts first in SQLite
        assert_eq!(totals[0].relay_id, None);
        assert_eq!(totals[1].relay_id.as_deref(), Some("north"));
        assert_eq!(totals[1].litres, 1.0);
    }

    #[tokio::test]
    async fn test_empty_ledger() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.ledger().totals_by_fuel_type().await.unwrap().is_empty());
        assert_eq!(db.ledger().count().await.unwrap(), 0);
    }
}
