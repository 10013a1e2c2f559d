//! Shared scaffolding for the end-to-end drain scenarios.

#![allow(dead_code)] // each scenario crate uses a subset of these helpers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use outbox_drain::{Config, MemoryWorkStore, Outcome, Transport, WorkItem};

type Script = Box<dyn Fn(&WorkItem, u64) -> Outcome + Send + Sync>;

/// Transport driven by a closure receiving `(item, global_call_index)`.
/// Every attempt is timestamped so tests can assert pacing behavior.
pub struct ScriptedTransport {
    script: Script,
    calls: AtomicU64,
    attempt_log: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedTransport {
    pub fn new(script: impl Fn(&WorkItem, u64) -> Outcome + Send + Sync + 'static) -> Self {
        ScriptedTransport {
            script: Box::new(script),
            calls: AtomicU64::new(0),
            attempt_log: Mutex::new(Vec::new()),
        }
    }

    pub fn always_success(latency_ms: u64) -> Self {
        Self::new(move |_, _| Outcome::Success { latency_ms })
    }

    /// Total send attempts observed.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timestamps of every attempt, in arrival order.
    pub fn attempt_log(&self) -> Vec<(String, Instant)> {
        self.attempt_log.lock().unwrap().clone()
    }

    /// Timestamps of the attempts made for one item.
    pub fn attempts_for(&self, id: &str) -> Vec<Instant> {
        self.attempt_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(item_id, _)| item_id == id)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, item: &WorkItem) -> Outcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempt_log
            .lock()
            .unwrap()
            .push((item.id.clone(), Instant::now()));
        (self.script)(item, call)
    }
}

/// An in-memory store pre-loaded with `n` pending items named `item-000`...
pub async fn seeded_store(n: usize) -> Arc<MemoryWorkStore> {
    let store = Arc::new(MemoryWorkStore::new());
    for i in 0..n {
        store
            .seed_pending(format!("item-{i:03}"), format!("payload-{i}").into_bytes())
            .await;
    }
    store
}

/// Config tuned for fast tests: no warmup, generous rates, short backoffs,
/// and background cadences pushed out of the test's way.
pub fn fast_config() -> Config {
    Config {
        endpoint: "http://localhost:0/unused".into(),
        warmup_duration_ms: 0,
        warmup_rate: 100,
        initial_rate: 100,
        max_rate: 200,
        ramp_interval_ms: 60_000,
        stats_interval_ms: 60_000,
        base_delay_ms: 20,
        jitter_ms: 20,
        ..Default::default()
    }
}
