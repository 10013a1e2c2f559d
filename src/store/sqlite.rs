//! Durable SQLite-backed work store.
//!
//! The outbox lives in a single `work_items` table. WAL mode is enabled for
//! concurrent access; the claim is a short transaction so two dispatchers
//! (or a dispatcher racing its own workers) can never double-claim an item.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::info;
use sqlx::{Row, SqlitePool};

use super::{now_millis, StoreError, WorkStore};
use crate::error::InitError;
use crate::model::{StoreCounts, WorkItem, WorkStatus};

/// SQLite-backed outbox.
pub struct SqliteWorkStore {
    pool: SqlitePool,
}

impl SqliteWorkStore {
    /// Opens (creating if needed) the outbox database and enables WAL mode.
    ///
    /// # Errors
    ///
    /// Returns `InitError::Pool` if the database file cannot be created or
    /// the pool cannot be opened.
    pub async fn connect(db_path: &Path) -> Result<Self, InitError> {
        let db_path_str = db_path.to_string_lossy().to_string();
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&db_path_str)
        {
            Ok(_) => info!("Outbox database file created."),
            Err(ref e) if e.kind() == ErrorKind::AlreadyExists => {
                info!("Outbox database file already exists.")
            }
            Err(e) => return Err(StoreError::FileCreation(e.to_string()).into()),
        }

        let pool = SqlitePool::connect(&format!("sqlite:{db_path_str}"))
            .await
            .map_err(StoreError::from)?;
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .map_err(StoreError::from)?;

        Ok(SqliteWorkStore { pool })
    }

    /// Creates the schema if it does not exist. Idempotent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_work_items_eligible
             ON work_items (status, next_attempt_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts pending items, skipping ids that already exist.
    pub async fn seed(&self, items: &[WorkItem]) -> Result<u64, StoreError> {
        let now = now_millis();
        let mut inserted = 0;
        for item in items {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO work_items
                 (id, payload, status, attempts, next_attempt_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, 0, ?3)",
            )
            .bind(&item.id)
            .bind(&item.payload)
            .bind(now)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    /// Returns items stranded in-flight by a previous crash to the pending
    /// state so they become claimable again.
    pub async fn recover_inflight(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE work_items SET status = 'pending', updated_at = ?1
             WHERE status = 'in_flight'",
        )
        .bind(now_millis())
        .execute(&self.pool)
        .await?;
        let recovered = result.rows_affected();
        if recovered > 0 {
            info!("Recovered {recovered} in-flight items from a previous run.");
        }
        Ok(recovered)
    }

    async fn set_status(&self, id: &str, status: WorkStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE work_items SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(now_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownItem(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkStore for SqliteWorkStore {
    async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            "SELECT id, payload, attempts FROM work_items
             WHERE status IN ('pending', 'failed') AND next_attempt_at <= ?1
             ORDER BY next_attempt_at, id
             LIMIT ?2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            sqlx::query(
                "UPDATE work_items SET status = 'in_flight', updated_at = ?1 WHERE id = ?2",
            )
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            let attempts: i64 = row.get("attempts");
            claimed.push(WorkItem {
                id,
                payload: row.get("payload"),
                status: WorkStatus::InFlight,
                attempts: attempts as u32,
                next_attempt_at: now,
            });
        }

        tx.commit().await?;
        Ok(claimed)
    }

    async fn mark_sent(&self, id: &str) -> Result<(), StoreError> {
        self.set_status(id, WorkStatus::Sent).await
    }

    async fn schedule_retry(
        &self,
        id: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let next_attempt_at = now_millis() + delay.as_millis() as i64;
        let result = sqlx::query(
            "UPDATE work_items
             SET status = 'failed', attempts = ?1, next_attempt_at = ?2, updated_at = ?3
             WHERE id = ?4",
        )
        .bind(i64::from(attempts))
        .bind(next_attempt_at)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownItem(id.to_string()));
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: &str) -> Result<(), StoreError> {
        self.set_status(id, WorkStatus::DeadLettered).await
    }

    async fn all_terminal(&self) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS open FROM work_items
             WHERE status NOT IN ('sent', 'dead_lettered')",
        )
        .fetch_one(&self.pool)
        .await?;
        let open: i64 = row.get("open");
        Ok(open == 0)
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM work_items GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = StoreCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match WorkStatus::parse(&status) {
                Some(WorkStatus::Pending) => counts.pending = n as u64,
                Some(WorkStatus::InFlight) => counts.in_flight = n as u64,
                Some(WorkStatus::Sent) => counts.sent = n as u64,
                Some(WorkStatus::Failed) => counts.failed = n as u64,
                Some(WorkStatus::DeadLettered) => counts.dead_lettered = n as u64,
                None => log::warn!("ignoring unknown status '{status}' in outbox"),
            }
        }
        Ok(counts)
    }
}
