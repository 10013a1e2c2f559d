//! Work-store adapter: the durable (or in-memory) queue the dispatcher
//! drains.
//!
//! Every operation is atomic per item. A worker only ever operates on items
//! it claimed (Pending|Failed -> InFlight); ownership returns to the store
//! through exactly one of `mark_sent`, `schedule_retry`, or
//! `move_to_dead_letter`.

mod memory;
mod sqlite;

pub use memory::MemoryWorkStore;
pub use sqlite::SqliteWorkStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{StoreCounts, WorkItem};

/// Error types for work-store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error creating the database file.
    #[error("database file creation error: {0}")]
    FileCreation(String),

    /// SQL execution error.
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// The referenced item does not exist in the store.
    #[error("unknown work item: {0}")]
    UnknownItem(String),
}

/// Polymorphic work store: in-memory for tests, SQLite for production.
#[async_trait]
pub trait WorkStore: Send + Sync {
    /// Atomically marks up to `limit` eligible items as in-flight and
    /// returns them. Eligible: status Pending or Failed with
    /// `next_attempt_at <= now`.
    async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, StoreError>;

    /// Finalizes a delivered item (terminal).
    async fn mark_sent(&self, id: &str) -> Result<(), StoreError>;

    /// Hands a retriable item back: status Failed, `attempts` recorded,
    /// eligible again after `delay`.
    async fn schedule_retry(&self, id: &str, attempts: u32, delay: Duration)
        -> Result<(), StoreError>;

    /// Gives up on an item (terminal); surfaced for manual handling.
    async fn move_to_dead_letter(&self, id: &str) -> Result<(), StoreError>;

    /// Whether every item is Sent or DeadLettered. An empty store is
    /// terminal.
    async fn all_terminal(&self) -> Result<bool, StoreError>;

    /// Per-status item counts, for the stats snapshot and final tallies.
    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}

/// Wall-clock now in epoch milliseconds, the store's time base.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
