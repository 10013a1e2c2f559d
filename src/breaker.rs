//! Circuit breaker over the outbound send path.
//!
//! After `failure_threshold` consecutive failures the circuit opens and all
//! traffic is blocked. Once `open_duration` elapses the breaker moves to a
//! half-open probe window: traffic is permitted again (the controller clamps
//! the pacer to a trickle), a failure snaps the circuit back open, and a
//! success arriving after the probe window has run its course closes it.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Observable breaker phase. The timed bookkeeping (`opened_at`,
/// `half_open_until`) stays internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerPhase {
    /// All traffic permitted.
    Closed,
    /// All traffic blocked until the open timer expires.
    Open,
    /// Probe window: traffic permitted at a reduced rate.
    HalfOpen,
}

impl std::fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerPhase::Closed => f.write_str("closed"),
            BreakerPhase::Open => f.write_str("open"),
            BreakerPhase::HalfOpen => f.write_str("half_open"),
        }
    }
}

type TransitionListener = Box<dyn Fn(BreakerPhase, BreakerPhase) + Send + Sync>;

struct BreakerInner {
    phase: BreakerPhase,
    opened_at: Option<Instant>,
    half_open_until: Option<Instant>,
    consecutive_failures: u32,
}

/// Shared circuit breaker. Internally synchronized; listeners run in the
/// caller's task after the internal lock is released.
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_duration: Duration,
    half_open_duration: Duration,
    half_open_probe_rate: u32,
    inner: Mutex<BreakerInner>,
    listeners: std::sync::Mutex<Vec<TransitionListener>>,
}

impl CircuitBreaker {
    pub fn new(
        failure_threshold: u32,
        open_duration: Duration,
        half_open_duration: Duration,
        half_open_probe_rate: u32,
    ) -> Self {
        CircuitBreaker {
            failure_threshold: failure_threshold.max(1),
            open_duration,
            half_open_duration,
            half_open_probe_rate,
            inner: Mutex::new(BreakerInner {
                phase: BreakerPhase::Closed,
                opened_at: None,
                half_open_until: None,
                consecutive_failures: 0,
            }),
            listeners: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Registers a transition listener invoked with `(from, to)`.
    ///
    /// Listeners must be non-blocking and must not call back into this
    /// breaker; they run synchronously in whichever task triggered the
    /// transition.
    pub fn on_transition(&self, listener: impl Fn(BreakerPhase, BreakerPhase) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(listener));
    }

    /// Whether traffic must be blocked right now.
    ///
    /// This is a state-advancing read: an expired open timer moves the
    /// breaker to `HalfOpen` and lets the current check through.
    pub async fn should_block(&self) -> bool {
        let mut transition = None;
        let blocked = {
            let mut inner = self.inner.lock().await;
            match inner.phase {
                BreakerPhase::Closed | BreakerPhase::HalfOpen => false,
                BreakerPhase::Open => {
                    let expired = inner
                        .opened_at
                        .map(|at| at.elapsed() >= self.open_duration)
                        .unwrap_or(true);
                    if expired {
                        inner.phase = BreakerPhase::HalfOpen;
                        inner.opened_at = None;
                        inner.half_open_until = Some(Instant::now() + self.half_open_duration);
                        inner.consecutive_failures = 0;
                        transition = Some((BreakerPhase::Open, BreakerPhase::HalfOpen));
                        false
                    } else {
                        true
                    }
                }
            }
        };
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
        blocked
    }

    /// Records a successful send.
    pub async fn on_success(&self) {
        let mut transition = None;
        {
            let mut inner = self.inner.lock().await;
            match inner.phase {
                BreakerPhase::Closed => inner.consecutive_failures = 0,
                BreakerPhase::HalfOpen => {
                    let window_done = inner
                        .half_open_until
                        .map(|until| Instant::now() >= until)
                        .unwrap_or(true);
                    if window_done {
                        inner.phase = BreakerPhase::Closed;
                        inner.half_open_until = None;
                        inner.consecutive_failures = 0;
                        transition = Some((BreakerPhase::HalfOpen, BreakerPhase::Closed));
                    }
                }
                // No sends should complete while open; ignore stragglers.
                BreakerPhase::Open => {}
            }
        }
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    /// Records a failed send.
    pub async fn on_failure(&self) {
        let mut transition = None;
        {
            let mut inner = self.inner.lock().await;
            match inner.phase {
                BreakerPhase::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.failure_threshold {
                        inner.phase = BreakerPhase::Open;
                        inner.opened_at = Some(Instant::now());
                        transition = Some((BreakerPhase::Closed, BreakerPhase::Open));
                    }
                }
                BreakerPhase::HalfOpen => {
                    inner.phase = BreakerPhase::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_until = None;
                    transition = Some((BreakerPhase::HalfOpen, BreakerPhase::Open));
                }
                BreakerPhase::Open => inner.consecutive_failures += 1,
            }
        }
        if let Some((from, to)) = transition {
            self.notify(from, to);
        }
    }

    /// Current phase, without advancing state.
    pub async fn state(&self) -> BreakerPhase {
        self.inner.lock().await.phase
    }

    /// Consecutive failure count (for monitoring).
    pub async fn consecutive_failures(&self) -> u32 {
        self.inner.lock().await.consecutive_failures
    }

    /// Advisory rate the controller clamps the pacer to while half-open.
    pub fn half_open_probe_rate(&self) -> u32 {
        self.half_open_probe_rate
    }

    fn notify(&self, from: BreakerPhase, to: BreakerPhase) {
        log::info!("circuit breaker: {from} -> {to}");
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener(from, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::sleep;

    fn breaker(threshold: u32, open_ms: u64, half_open_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            threshold,
            Duration::from_millis(open_ms),
            Duration::from_millis(half_open_ms),
            3,
        )
    }

    /// Polls until the breaker reaches the expected blocking state.
    ///
    /// Handles timing slop the way the clock-driven open/half-open
    /// transitions require on loaded CI machines.
    async fn wait_for_block_state(cb: &CircuitBreaker, expected_blocked: bool, timeout: Duration) {
        let start = Instant::now();
        loop {
            if cb.should_block().await == expected_blocked {
                return;
            }
            if start.elapsed() >= timeout {
                panic!(
                    "timeout waiting for blocked={} (state: {:?})",
                    expected_blocked,
                    cb.state().await
                );
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = breaker(3, 100, 50);

        cb.on_failure().await;
        cb.on_failure().await;
        assert!(!cb.should_block().await);
        assert_eq!(cb.consecutive_failures().await, 2);

        cb.on_failure().await;
        assert_eq!(cb.state().await, BreakerPhase::Open);
        assert!(cb.should_block().await);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let cb = breaker(3, 100, 50);
        cb.on_failure().await;
        cb.on_failure().await;
        cb.on_success().await;
        assert_eq!(cb.consecutive_failures().await, 0);
        cb.on_failure().await;
        cb.on_failure().await;
        assert_eq!(cb.state().await, BreakerPhase::Closed);
    }

    #[tokio::test]
    async fn test_open_expires_into_half_open() {
        let cb = breaker(1, 40, 30);
        cb.on_failure().await;
        assert!(cb.should_block().await);

        sleep(Duration::from_millis(50)).await;
        // the expiring check itself is let through
        assert!(!cb.should_block().await);
        assert_eq!(cb.state().await, BreakerPhase::HalfOpen);
        assert_eq!(cb.consecutive_failures().await, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, 30, 30);
        cb.on_failure().await;
        wait_for_block_state(&cb, false, Duration::from_millis(500)).await;
        assert_eq!(cb.state().await, BreakerPhase::HalfOpen);

        cb.on_failure().await;
        assert_eq!(cb.state().await, BreakerPhase::Open);
        assert!(cb.should_block().await);
    }

    #[tokio::test]
    async fn test_half_open_success_after_window_closes() {
        let cb = breaker(1, 30, 40);
        cb.on_failure().await;
        wait_for_block_state(&cb, false, Duration::from_millis(500)).await;

        // success during the probe window keeps probing
        cb.on_success().await;
        assert_eq!(cb.state().await, BreakerPhase::HalfOpen);

        sleep(Duration::from_millis(50)).await;
        cb.on_success().await;
        assert_eq!(cb.state().await, BreakerPhase::Closed);
    }

    #[tokio::test]
    async fn test_listener_sees_every_transition() {
        let cb = breaker(1, 30, 30);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        cb.on_transition(move |from, to| {
            seen_clone.lock().unwrap().push((from, to));
        });

        cb.on_failure().await;
        wait_for_block_state(&cb, false, Duration::from_millis(500)).await;
        sleep(Duration::from_millis(40)).await;
        cb.on_success().await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (BreakerPhase::Closed, BreakerPhase::Open),
                (BreakerPhase::Open, BreakerPhase::HalfOpen),
                (BreakerPhase::HalfOpen, BreakerPhase::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_listener_runs_outside_lock() {
        // A listener that immediately performs a (blocking) no-op must not
        // deadlock the breaker; re-entering the breaker is forbidden by
        // contract, so we just verify calls keep flowing after notification.
        let cb = breaker(1, 10, 10);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        cb.on_transition(move |_, _| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        cb.on_failure().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cb.should_block().await);
    }

    #[tokio::test]
    async fn test_probe_rate_is_advisory() {
        let cb = CircuitBreaker::new(
            10,
            Duration::from_secs(30),
            Duration::from_secs(10),
            3,
        );
        assert_eq!(cb.half_open_probe_rate(), 3);
    }
}
