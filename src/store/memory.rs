//! In-memory work store for tests and demos.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{now_millis, StoreError, WorkStore};
use crate::model::{StoreCounts, WorkItem, WorkStatus};

/// Non-durable store backed by a map. Claim order follows item id, which
/// keeps tests deterministic.
#[derive(Default)]
pub struct MemoryWorkStore {
    items: Mutex<BTreeMap<String, WorkItem>>,
}

impl MemoryWorkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an item as-is, replacing any item with the same id.
    pub async fn seed(&self, item: WorkItem) {
        self.items.lock().await.insert(item.id.clone(), item);
    }

    /// Inserts a fresh pending item that is immediately eligible.
    pub async fn seed_pending(&self, id: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.seed(WorkItem::pending(id, payload)).await;
    }

    /// Snapshot of one item, for assertions.
    pub async fn get(&self, id: &str) -> Option<WorkItem> {
        self.items.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl WorkStore for MemoryWorkStore {
    async fn claim(&self, limit: usize) -> Result<Vec<WorkItem>, StoreError> {
        let mut items = self.items.lock().await;
        let now = now_millis();
        let mut claimed = Vec::new();
        for item in items.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            let eligible = matches!(item.status, WorkStatus::Pending | WorkStatus::Failed)
                && item.next_attempt_at <= now;
            if eligible {
                item.status = WorkStatus::InFlight;
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, id: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownItem(id.to_string()))?;
        item.status = WorkStatus::Sent;
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownItem(id.to_string()))?;
        item.status = WorkStatus::Failed;
        item.attempts = attempts;
        item.next_attempt_at = now_millis() + delay.as_millis() as i64;
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().await;
        let item = items
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownItem(id.to_string()))?;
        item.status = WorkStatus::DeadLettered;
        Ok(())
    }

    async fn all_terminal(&self) -> Result<bool, StoreError> {
        let items = self.items.lock().await;
        Ok(items.values().all(|item| item.status.is_terminal()))
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        let items = self.items.lock().await;
        let mut counts = StoreCounts::default();
        for item in items.values() {
            match item.status {
                WorkStatus::Pending => counts.pending += 1,
                WorkStatus::InFlight => counts.in_flight += 1,
                WorkStatus::Sent => counts.sent += 1,
                WorkStatus::Failed => counts.failed += 1,
                WorkStatus::DeadLettered => counts.dead_lettered += 1,
            }
        }
        Ok(counts)
    }
}
