//! The engine: dispatcher, worker pool, and the glue between the control
//! components.
//!
//! All mutable control state (pacer, window, breaker, controller) lives in
//! one `Engine` aggregate constructed at startup; nothing is process-global.
//! The dispatcher claims batches from the work store and schedules each item
//! on a semaphore-bounded worker pool. Every worker follows the same strict
//! sequence: wait out the breaker, take one pacer token, send, record the
//! outcome, finalize the item.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::config::{Config, BREAKER_BLOCK_SPIN, IDLE_SLEEP};
use crate::controller::RateController;
use crate::model::{Outcome, WorkItem};
use crate::pacer::TokenBucket;
use crate::retry::RetryPolicy;
use crate::store::WorkStore;
use crate::transport::Transport;
use crate::window::SlidingWindow;

/// Results of a completed drain run.
#[derive(Debug, Clone)]
pub struct DrainReport {
    /// Items delivered successfully.
    pub sent: u64,
    /// Items given up on.
    pub dead_lettered: u64,
    /// Times an item was handed back to the store for a later attempt.
    pub retries_scheduled: u64,
    /// Elapsed time in seconds.
    pub elapsed_seconds: f64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dead_lettered: AtomicU64,
    retries_scheduled: AtomicU64,
}

/// Everything a worker task needs, bundled once and shared by `Arc`.
struct WorkerContext {
    store: Arc<dyn WorkStore>,
    transport: Arc<dyn Transport>,
    pacer: Arc<TokenBucket>,
    window: Arc<SlidingWindow>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    retry_max: u32,
    max_inflight_attempts: u32,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

/// The drain pipeline aggregate.
pub struct Engine {
    config: Config,
    store: Arc<dyn WorkStore>,
    transport: Arc<dyn Transport>,
    pacer: Arc<TokenBucket>,
    window: Arc<SlidingWindow>,
    breaker: Arc<CircuitBreaker>,
    controller: Arc<RateController>,
    counters: Arc<Counters>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn WorkStore>, transport: Arc<dyn Transport>) -> Self {
        // the pacer starts at the warmup rate so no token is ever minted
        // above it before the controller task takes over
        let pacer = Arc::new(TokenBucket::new(config.warmup_rate));
        let window = Arc::new(SlidingWindow::new(config.window_duration()));
        let breaker = Arc::new(CircuitBreaker::new(
            config.failure_threshold,
            Duration::from_millis(config.open_duration_ms),
            Duration::from_millis(config.half_open_duration_ms),
            config.half_open_probe_rate,
        ));
        let controller = Arc::new(RateController::new(
            &config,
            Arc::clone(&pacer),
            Arc::clone(&window),
            Arc::clone(&breaker),
        ));
        Engine {
            config,
            store,
            transport,
            pacer,
            window,
            breaker,
            controller,
            counters: Arc::new(Counters::default()),
        }
    }

    /// The pacer shaping this engine's emission.
    pub fn pacer(&self) -> &Arc<TokenBucket> {
        &self.pacer
    }

    /// The sliding signal window fed by this engine's workers.
    pub fn window(&self) -> &Arc<SlidingWindow> {
        &self.window
    }

    /// The circuit breaker guarding this engine's sends.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The AIMD controller driving this engine's pacer.
    pub fn controller(&self) -> &Arc<RateController> {
        &self.controller
    }

    /// Drains the store until every item is terminal or `shutdown` fires.
    ///
    /// On shutdown no new batches are claimed; in-flight workers complete
    /// and unstarted claims are handed back to the store.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<DrainReport> {
        let started = Instant::now();
        let background = CancellationToken::new();

        let controller_task = tokio::spawn({
            let controller = Arc::clone(&self.controller);
            let token = background.clone();
            async move { controller.run(token).await }
        });

        let stats_task = tokio::spawn(stats_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.pacer),
            Arc::clone(&self.window),
            Arc::clone(&self.breaker),
            Arc::clone(&self.counters),
            self.config.stats_interval(),
            background.clone(),
        ));

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = FuturesUnordered::new();
        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            pacer: Arc::clone(&self.pacer),
            window: Arc::clone(&self.window),
            breaker: Arc::clone(&self.breaker),
            policy: RetryPolicy::from_config(&self.config),
            retry_max: self.config.retry_max.max(1),
            max_inflight_attempts: self.config.max_inflight_attempts.max(1),
            counters: Arc::clone(&self.counters),
            shutdown: shutdown.clone(),
        });

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let batch = self
                .store
                .claim(self.config.batch_size)
                .await
                .context("failed to claim work batch")?;

            if batch.is_empty() {
                reap_finished(&mut tasks);
                if tasks.is_empty() && self.store.all_terminal().await? {
                    break;
                }
                tokio::select! {
                    _ = sleep(IDLE_SLEEP) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            for item in batch {
                if shutdown.is_cancelled() {
                    // hand unstarted claims straight back
                    if let Err(e) = self
                        .store
                        .schedule_retry(&item.id, item.attempts, Duration::ZERO)
                        .await
                    {
                        log::warn!("failed to return claim {}: {e}", item.id);
                    }
                    continue;
                }
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .context("worker semaphore closed")?;
                let ctx = Arc::clone(&ctx);
                tasks.push(tokio::spawn(async move {
                    let _permit = permit;
                    process_item(ctx, item).await;
                }));
            }

            reap_finished(&mut tasks);
        }

        // graceful drain: in-flight workers run to completion
        while let Some(result) = tasks.next().await {
            if let Err(join_error) = result {
                log::warn!("worker task panicked: {join_error:?}");
            }
        }

        background.cancel();
        let _ = controller_task.await;
        let _ = stats_task.await;

        let elapsed_seconds = started.elapsed().as_secs_f64();
        let report = DrainReport {
            sent: self.counters.sent.load(Ordering::SeqCst),
            dead_lettered: self.counters.dead_lettered.load(Ordering::SeqCst),
            retries_scheduled: self.counters.retries_scheduled.load(Ordering::SeqCst),
            elapsed_seconds,
        };
        log::info!(
            "drain finished: sent={} dead_lettered={} retries_scheduled={} in {:.2}s",
            report.sent,
            report.dead_lettered,
            report.retries_scheduled,
            elapsed_seconds
        );
        Ok(report)
    }
}

/// Drops completed worker handles without waiting for the rest.
fn reap_finished(tasks: &mut FuturesUnordered<tokio::task::JoinHandle<()>>) {
    loop {
        match tasks.next().now_or_never() {
            Some(Some(Err(join_error))) => {
                log::warn!("worker task panicked: {join_error:?}");
            }
            Some(Some(Ok(()))) => {}
            _ => break,
        }
    }
}

/// One claimed item, start to finish.
async fn process_item(ctx: Arc<WorkerContext>, mut item: WorkItem) {
    // breaker gate: hard cutoff while the circuit is open
    while ctx.breaker.should_block().await {
        if ctx.shutdown.is_cancelled() {
            if let Err(e) = ctx
                .store
                .schedule_retry(&item.id, item.attempts, Duration::ZERO)
                .await
            {
                log::warn!("failed to return claim {}: {e}", item.id);
            }
            return;
        }
        sleep(BREAKER_BLOCK_SPIN).await;
    }

    ctx.pacer.acquire().await;

    let mut inflight_attempts = 0u32;
    let mut previous_delay = None;
    loop {
        inflight_attempts += 1;
        item.attempts += 1;

        let started = Instant::now();
        let outcome = ctx.transport.send(&item).await;
        let latency_ms = match &outcome {
            Outcome::Success { latency_ms } => *latency_ms,
            _ => started.elapsed().as_millis() as u64,
        };

        ctx.window.record(latency_ms, outcome.is_success()).await;
        if outcome.is_success() {
            ctx.breaker.on_success().await;
        } else {
            ctx.breaker.on_failure().await;
        }

        match outcome {
            Outcome::Success { .. } => {
                finalize(&ctx, &item.id, Finalize::Sent).await;
                return;
            }
            Outcome::ClientReject { status } => {
                log::warn!("{}: rejected with status {status}, dead-lettering", item.id);
                finalize(&ctx, &item.id, Finalize::DeadLetter).await;
                return;
            }
            outcome => {
                log::debug!("{}: attempt {} failed: {outcome}", item.id, item.attempts);

                if item.attempts >= ctx.retry_max {
                    log::warn!(
                        "{}: retries exhausted after {} attempts, dead-lettering",
                        item.id,
                        item.attempts
                    );
                    finalize(&ctx, &item.id, Finalize::DeadLetter).await;
                    return;
                }

                if inflight_attempts >= ctx.max_inflight_attempts {
                    // yield the worker slot; the store will hand the item
                    // back once its backoff elapses
                    let delay = ctx.policy.reschedule_delay(item.attempts);
                    finalize(&ctx, &item.id, Finalize::Retry(item.attempts, delay)).await;
                    return;
                }

                let delay =
                    ctx.policy
                        .delay_with_hint(item.attempts, previous_delay, outcome.retry_after());
                previous_delay = Some(delay);
                sleep(delay).await;
                // consecutive in-flight attempts keep the pacer slot
            }
        }
    }
}

enum Finalize {
    Sent,
    DeadLetter,
    Retry(u32, Duration),
}

async fn finalize(ctx: &WorkerContext, id: &str, action: Finalize) {
    let result = match &action {
        Finalize::Sent => ctx.store.mark_sent(id).await,
        Finalize::DeadLetter => ctx.store.move_to_dead_letter(id).await,
        Finalize::Retry(attempts, delay) => ctx.store.schedule_retry(id, *attempts, *delay).await,
    };
    match result {
        Ok(()) => {
            let counter = match action {
                Finalize::Sent => &ctx.counters.sent,
                Finalize::DeadLetter => &ctx.counters.dead_lettered,
                Finalize::Retry(..) => &ctx.counters.retries_scheduled,
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => log::error!("failed to finalize {id}: {e}"),
    }
}

/// Emits the periodic statistics snapshot through the logger.
async fn stats_loop(
    store: Arc<dyn WorkStore>,
    pacer: Arc<TokenBucket>,
    window: Arc<SlidingWindow>,
    breaker: Arc<CircuitBreaker>,
    counters: Arc<Counters>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = sleep(interval) => {
                let counts = match store.counts().await {
                    Ok(counts) => counts,
                    Err(e) => {
                        log::warn!("stats: failed to read store counts: {e}");
                        continue;
                    }
                };
                let snapshot = window.snapshot().await;
                log::info!(
                    target: "outbox_drain::stats",
                    "queue_depth={} rate_per_sec={} p95_latency_ms={} error_rate_percent={:.1} breaker_state={} sent_total={}",
                    counts.backlog(),
                    pacer.rate().await,
                    snapshot.p95_ms,
                    snapshot.error_rate * 100.0,
                    breaker.state().await,
                    counters.sent.load(Ordering::SeqCst),
                );
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkStatus;
    use crate::store::MemoryWorkStore;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl Transport for AlwaysOk {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            Outcome::Success { latency_ms: 5 }
        }
    }

    struct AlwaysReject;

    #[async_trait]
    impl Transport for AlwaysReject {
        async fn send(&self, _item: &WorkItem) -> Outcome {
            Outcome::ClientReject { status: 400 }
        }
    }

    fn fast_config() -> Config {
        Config {
            warmup_duration_ms: 0,
            ramp_interval_ms: 200,
            initial_rate: 100,
            max_rate: 200,
            warmup_rate: 100,
            stats_interval_ms: 10_000,
            base_delay_ms: 10,
            jitter_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_drains_everything_on_success() {
        let store = Arc::new(MemoryWorkStore::new());
        for i in 0..20 {
            store.seed_pending(format!("item-{i:02}"), b"x".to_vec()).await;
        }
        let engine = Engine::new(fast_config(), Arc::clone(&store) as _, Arc::new(AlwaysOk));

        let report = engine.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 20);
        assert_eq!(report.dead_lettered, 0);
        assert!(store.all_terminal().await.unwrap());
        // every success results in exactly one mark_sent
        for i in 0..20 {
            let item = store.get(&format!("item-{i:02}")).await.unwrap();
            assert_eq!(item.status, WorkStatus::Sent);
        }
    }

    #[tokio::test]
    async fn test_client_rejects_go_to_dead_letter_without_retry() {
        let store = Arc::new(MemoryWorkStore::new());
        store.seed_pending("bad", b"x".to_vec()).await;
        let engine = Engine::new(fast_config(), Arc::clone(&store) as _, Arc::new(AlwaysReject));

        let report = engine.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.retries_scheduled, 0);
        let item = store.get("bad").await.unwrap();
        assert_eq!(item.status, WorkStatus::DeadLettered);
        assert_eq!(item.attempts, 1);
    }

    #[tokio::test]
    async fn test_empty_store_finishes_immediately() {
        let store = Arc::new(MemoryWorkStore::new());
        let engine = Engine::new(fast_config(), store as _, Arc::new(AlwaysOk));
        let report = engine.run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.sent, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_claiming() {
        let store = Arc::new(MemoryWorkStore::new());
        for i in 0..500 {
            store.seed_pending(format!("item-{i:03}"), b"x".to_vec()).await;
        }
        // a slow pacer guarantees plenty of backlog survives the shutdown
        let config = Config {
            warmup_rate: 2,
            initial_rate: 2,
            warmup_duration_ms: 60_000,
            ..fast_config()
        };
        let engine = Engine::new(config, Arc::clone(&store) as _, Arc::new(AlwaysOk));

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let report = engine.run(shutdown).await.unwrap();
        let counts = store.counts().await.unwrap();
        // nothing is lost or left in flight, and most of the backlog remains
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.sent, report.sent);
        assert!(counts.backlog() > 0, "expected remaining backlog");
    }
}
