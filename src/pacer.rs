//! Token-bucket pacer shaping the outbound request stream.
//!
//! The bucket refills continuously and lazily: every operation first credits
//! `elapsed * rate` tokens (capped at capacity) before acting. Capacity is
//! always one second of rate, so short bursts are bounded by the rate itself.
//! Rate changes take effect immediately for future refills; tokens already
//! in the bucket are carried over, clamped to the new capacity, so lowering
//! the rate can never create a burst.

use std::time::Instant;

use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::PACER_POLL_INTERVAL;

struct BucketState {
    /// Tokens added per second. Always >= 1.
    rate: u32,
    /// Maximum tokens the bucket holds; equals `rate`.
    capacity: f64,
    /// Currently available tokens, in `[0, capacity]`.
    tokens: f64,
    /// When tokens were last credited.
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        // saturating elapsed guards against clock oddities under test pausing
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * f64::from(self.rate)).min(self.capacity);
        self.last_refill = now;
    }
}

/// Shared token bucket. Internally synchronized; callers need no external
/// locking.
pub struct TokenBucket {
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Creates a bucket emitting at most `rate` tokens per second, starting
    /// full. A `rate` of zero is clamped to 1.
    pub fn new(rate: u32) -> Self {
        let rate = rate.max(1);
        TokenBucket {
            state: Mutex::new(BucketState {
                rate,
                capacity: f64::from(rate),
                tokens: f64::from(rate),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Blocks cooperatively until one token is available, then consumes it.
    ///
    /// Multiple waiters race for freshly refilled tokens; no ordering between
    /// waiters is promised.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire().await {
                return;
            }
            sleep(PACER_POLL_INTERVAL).await;
        }
    }

    /// Consumes one token if available. Never waits.
    pub async fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Atomically resets rate and capacity to `rate` (clamped to >= 1).
    ///
    /// Accrued tokens are refilled at the old rate first, then clamped to the
    /// new capacity, so a decrease takes hold without a parting burst.
    pub async fn set_rate(&self, rate: u32) {
        let rate = rate.max(1);
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        state.rate = rate;
        state.capacity = f64::from(rate);
        state.tokens = state.tokens.min(state.capacity);
    }

    /// Current rate in tokens per second.
    pub async fn rate(&self) -> u32 {
        self.state.lock().await.rate
    }

    /// Whole tokens currently available, after a lazy refill.
    pub async fn available_tokens(&self) -> u64 {
        let mut state = self.state.lock().await;
        state.refill(Instant::now());
        state.tokens as u64
    }
}
