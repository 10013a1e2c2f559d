//! AIMD rate controller driving the pacer.
//!
//! From process start until the warmup window elapses the pacer is pinned to
//! a conservative warmup rate. After that a single control loop ticks at a
//! fixed cadence, reads the sliding-window signals, and applies
//! additive-increase / multiplicative-decrease to the pacer rate. While the
//! circuit breaker is half-open the effective rate is clamped to its
//! advisory probe rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerPhase, CircuitBreaker};
use crate::config::Config;
use crate::pacer::TokenBucket;
use crate::window::SlidingWindow;

/// Why the controller changed the rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateChangeReason {
    WarmupComplete,
    Increase,
    Decrease,
    Forced,
}

impl std::fmt::Display for RateChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateChangeReason::WarmupComplete => f.write_str("warmup_complete"),
            RateChangeReason::Increase => f.write_str("increase"),
            RateChangeReason::Decrease => f.write_str("decrease"),
            RateChangeReason::Forced => f.write_str("forced"),
        }
    }
}

/// Window signals that informed a rate decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct Signals {
    pub error_rate: f64,
    pub p95_ms: u64,
}

/// Passed to rate-change listeners.
#[derive(Debug, Clone, Copy)]
pub struct RateChange {
    pub old: u32,
    pub new: u32,
    pub reason: RateChangeReason,
    pub signals: Signals,
}

type RateListener = Box<dyn Fn(&RateChange) + Send + Sync>;

/// AIMD controller. Owns the target rate; the pacer only ever sees the
/// effective (possibly probe-clamped) value.
pub struct RateController {
    pacer: Arc<TokenBucket>,
    window: Arc<SlidingWindow>,
    breaker: Arc<CircuitBreaker>,
    min_rate: u32,
    max_rate: u32,
    additive_step: u32,
    multiplicative_factor: f64,
    error_threshold: f64,
    latency_threshold_ms: u64,
    warmup_rate: u32,
    warmup_duration: Duration,
    ramp_interval: Duration,
    started_at: Instant,
    warmup_done: AtomicBool,
    current_rate: Mutex<u32>,
    listeners: std::sync::Mutex<Vec<RateListener>>,
}

impl RateController {
    pub fn new(
        config: &Config,
        pacer: Arc<TokenBucket>,
        window: Arc<SlidingWindow>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let min_rate = config.min_rate.max(1);
        let max_rate = config.max_rate.max(min_rate);
        RateController {
            pacer,
            window,
            breaker,
            min_rate,
            max_rate,
            additive_step: config.additive_step.max(1),
            multiplicative_factor: config.multiplicative_factor,
            error_threshold: config.error_threshold,
            latency_threshold_ms: config.latency_threshold_ms,
            warmup_rate: config.warmup_rate.max(1),
            warmup_duration: config.warmup_duration(),
            ramp_interval: config.ramp_interval(),
            started_at: Instant::now(),
            warmup_done: AtomicBool::new(false),
            current_rate: Mutex::new(config.initial_rate.clamp(min_rate, max_rate)),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener invoked on every actual rate change.
    ///
    /// Listeners must be non-blocking and must not call back into the
    /// controller or the pacer; they run synchronously in the control loop's
    /// task.
    pub fn on_rate_change(&self, listener: impl Fn(&RateChange) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(listener));
    }

    /// The controller's target rate (ignoring any half-open clamp).
    pub async fn current_rate(&self) -> u32 {
        *self.current_rate.lock().await
    }

    /// Whether the warmup window has elapsed.
    pub fn warmup_done(&self) -> bool {
        if self.warmup_done.load(Ordering::Relaxed) {
            return true;
        }
        if self.started_at.elapsed() >= self.warmup_duration {
            self.warmup_done.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// One AIMD tick over the supplied signals. Returns the effective rate
    /// applied to the pacer.
    ///
    /// During warmup this is a no-op: the pacer stays pinned to the warmup
    /// rate and the target rate is untouched.
    pub async fn update(&self, error_rate: f64, p95_ms: u64) -> u32 {
        if !self.warmup_done() {
            return self.warmup_rate;
        }

        let degraded = error_rate > self.error_threshold || p95_ms > self.latency_threshold_ms;
        let (old, new) = {
            let mut rate = self.current_rate.lock().await;
            let old = *rate;
            let new = if degraded {
                let decreased = (f64::from(old) * self.multiplicative_factor).floor() as u32;
                decreased.max(self.min_rate)
            } else {
                old.saturating_add(self.additive_step).min(self.max_rate)
            };
            *rate = new;
            (old, new)
        };

        if new != old {
            let reason = if degraded {
                RateChangeReason::Decrease
            } else {
                RateChangeReason::Increase
            };
            log::info!(
                "rate {reason}: {old} -> {new} rps (error_rate={:.1}%, p95={p95_ms}ms)",
                error_rate * 100.0
            );
            self.notify(RateChange {
                old,
                new,
                reason,
                signals: Signals { error_rate, p95_ms },
            });
        }

        self.apply(new).await
    }

    /// Forced override, clamped to `[min_rate, max_rate]`. Returns the
    /// effective rate applied to the pacer.
    pub async fn set_rate(&self, rate: u32) -> u32 {
        let clamped = rate.clamp(self.min_rate, self.max_rate);
        let old = {
            let mut current = self.current_rate.lock().await;
            let old = *current;
            *current = clamped;
            old
        };
        if clamped != old {
            self.notify(RateChange {
                old,
                new: clamped,
                reason: RateChangeReason::Forced,
                signals: Signals::default(),
            });
        }
        self.apply(clamped).await
    }

    /// Clamps to the breaker's probe rate while half-open and pushes the
    /// result into the pacer.
    async fn apply(&self, rate: u32) -> u32 {
        let effective = if self.breaker.state().await == BreakerPhase::HalfOpen {
            rate.min(self.breaker.half_open_probe_rate())
        } else {
            rate
        };
        self.pacer.set_rate(effective).await;
        effective
    }

    /// The control loop: pin for warmup, then tick until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.pacer.set_rate(self.warmup_rate).await;
        log::debug!(
            "warmup: pinned to {} rps for {:?}",
            self.warmup_rate,
            self.warmup_duration
        );

        let remaining = self
            .warmup_duration
            .saturating_sub(self.started_at.elapsed());
        tokio::select! {
            _ = sleep(remaining) => {}
            _ = shutdown.cancelled() => return,
        }

        self.warmup_done.store(true, Ordering::Relaxed);
        let current = *self.current_rate.lock().await;
        self.notify(RateChange {
            old: self.warmup_rate,
            new: current,
            reason: RateChangeReason::WarmupComplete,
            signals: Signals::default(),
        });
        let effective = self.apply(current).await;
        log::info!("warmup complete, ramping from {effective} rps");

        loop {
            tokio::select! {
                _ = sleep(self.ramp_interval) => {
                    let snapshot = self.window.snapshot().await;
                    self.update(snapshot.error_rate, snapshot.p95_ms).await;
                }
                _ = shutdown.cancelled() => break,
            }
        }
    }

    fn notify(&self, change: RateChange) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener(&change);
        }
    }
}
