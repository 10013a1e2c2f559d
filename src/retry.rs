//! Retry delays: exponential backoff, jitter, and server retry hints.
//!
//! The backoff for attempt `n` is `min(2^n * base, cap)`. Three jitter modes
//! spread recovering clients apart; a server-supplied `Retry-After` always
//! wins over a shorter computed delay.

use std::future::Future;
use std::time::Duration;

use clap::ValueEnum;
use rand::Rng;

use crate::config::Config;

/// How the computed backoff is randomized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum JitterKind {
    /// Add a uniform `[0, jitter)` offset on top of the backoff.
    #[default]
    Random,
    /// Replace the backoff with a uniform draw from `[0, backoff]`.
    Full,
    /// Uniform draw from `[base, min(3 * previous, cap)]`; successive delays
    /// decorrelate from the exponential schedule entirely.
    Decorrelated,
}

/// Delay schedule shared by the in-flight retry loop and the store
/// rescheduler.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts an item may receive.
    pub max_attempts: u32,
    /// Backoff unit (`base_delay_ms`).
    pub base_delay: Duration,
    /// Upper bound on any computed delay.
    pub cap: Duration,
    /// Width of the additive jitter range for [`JitterKind::Random`].
    pub jitter_width: Duration,
    /// Jitter mode.
    pub kind: JitterKind,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        RetryPolicy {
            max_attempts: config.retry_max.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            cap: Duration::from_secs(config.backoff_cap_seconds),
            jitter_width: Duration::from_millis(config.jitter_ms),
            kind: config.jitter,
        }
    }

    /// Deterministic backoff for the given attempt: `min(2^attempt * base, cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let multiplier = 2u64.saturating_pow(attempt.min(32));
        let delay_ms = base_ms.saturating_mul(multiplier);
        Duration::from_millis(delay_ms).min(self.cap)
    }

    /// Jittered delay before the next attempt.
    ///
    /// `previous` is the delay slept before the last attempt; only the
    /// decorrelated mode uses it.
    pub fn next_delay(&self, attempt: u32, previous: Option<Duration>) -> Duration {
        let backoff = self.backoff(attempt);
        let mut rng = rand::thread_rng();
        match self.kind {
            JitterKind::Random => {
                let jitter_ms = self.jitter_width.as_millis() as u64;
                let jitter = if jitter_ms == 0 {
                    0
                } else {
                    rng.gen_range(0..jitter_ms)
                };
                (backoff + Duration::from_millis(jitter)).min(self.cap)
            }
            JitterKind::Full => {
                let backoff_ms = backoff.as_millis() as u64;
                Duration::from_millis(rng.gen_range(0..=backoff_ms))
            }
            JitterKind::Decorrelated => {
                let base_ms = self.base_delay.as_millis() as u64;
                let prev_ms = previous.unwrap_or(self.base_delay).as_millis() as u64;
                let cap_ms = self.cap.as_millis() as u64;
                let upper = prev_ms.saturating_mul(3).min(cap_ms).max(base_ms);
                Duration::from_millis(rng.gen_range(base_ms..=upper))
            }
        }
    }

    /// Delay before the next in-flight attempt, honoring a server hint.
    pub fn delay_with_hint(
        &self,
        attempt: u32,
        previous: Option<Duration>,
        retry_after: Option<Duration>,
    ) -> Duration {
        let computed = self.next_delay(attempt, previous);
        match retry_after {
            Some(hint) => computed.max(hint),
            None => computed,
        }
    }

    /// Delay used when an item is handed back to the store:
    /// `min(2^next_attempt, cap)` seconds plus a sub-second fractional jitter.
    pub fn reschedule_delay(&self, next_attempt: u32) -> Duration {
        let cap_secs = self.cap.as_secs().max(1);
        let backoff_secs = 2u64.saturating_pow(next_attempt.min(32)).min(cap_secs);
        let fraction: f64 = rand::thread_rng().gen_range(0.0..1.0);
        Duration::from_secs_f64(backoff_secs as f64 + fraction)
    }
}

/// Result of [`execute`]: the final outcome plus how many attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: anyhow::Result<T>,
    pub attempts: u32,
}

impl<T> RetryOutcome<T> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs `operation` up to `policy.max_attempts` times with jittered backoff
/// between failures, reporting the final result and the attempt count.
///
/// This is the standalone helper form of the in-flight retry loop; the engine
/// itself drives retries directly so it can weave in pacing and breaker
/// bookkeeping between attempts.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut previous = None;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(error) => {
                if attempt >= max_attempts {
                    return RetryOutcome {
                        result: Err(error),
                        attempts: attempt,
                    };
                }
                let delay = policy.next_delay(attempt, previous);
                log::debug!(
                    "attempt {attempt} failed ({error}), retrying in {}ms",
                    delay.as_millis()
                );
                previous = Some(delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(kind: JitterKind) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(1_000),
            cap: Duration::from_secs(300),
            jitter_width: Duration::from_millis(1_000),
            kind,
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let p = RetryPolicy {
            cap: Duration::from_secs(8),
            ..policy(JitterKind::Random)
        };
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
        assert_eq!(p.backoff(3), Duration::from_secs(8));
        assert_eq!(p.backoff(4), Duration::from_secs(8));
        assert_eq!(p.backoff(30), Duration::from_secs(8));
    }

    #[test]
    fn test_random_jitter_stays_in_band() {
        let p = policy(JitterKind::Random);
        for _ in 0..200 {
            let d = p.next_delay(1, None);
            assert!(d >= Duration::from_secs(2), "below backoff: {d:?}");
            assert!(d < Duration::from_secs(3), "above backoff+jitter: {d:?}");
        }
    }

    #[test]
    fn test_full_jitter_bounded_by_backoff() {
        let p = policy(JitterKind::Full);
        for _ in 0..200 {
            let d = p.next_delay(2, None);
            assert!(d <= Duration::from_secs(4), "above backoff: {d:?}");
        }
    }

    #[test]
    fn test_decorrelated_jitter_range() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(100),
            cap: Duration::from_millis(3_000),
            ..policy(JitterKind::Decorrelated)
        };
        let mut prev = None;
        for _ in 0..500 {
            let d = p.next_delay(1, prev);
            assert!(d >= Duration::from_millis(100), "below base: {d:?}");
            assert!(d <= Duration::from_millis(3_000), "above cap: {d:?}");
            prev = Some(d);
        }
    }

    #[test]
    fn test_retry_after_hint_wins_when_longer() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(10),
            jitter_width: Duration::from_millis(5),
            ..policy(JitterKind::Random)
        };
        let d = p.delay_with_hint(0, None, Some(Duration::from_millis(1_500)));
        assert!(d >= Duration::from_millis(1_500));
    }

    #[test]
    fn test_reschedule_delay_shape() {
        let p = policy(JitterKind::Random);
        for next_attempt in 1..=4u32 {
            let d = p.reschedule_delay(next_attempt);
            let floor = 2u64.pow(next_attempt);
            assert!(d >= Duration::from_secs(floor), "{d:?} below 2^{next_attempt}");
            assert!(d < Duration::from_secs(floor + 1), "{d:?} jitter above 1s");
        }
        // capped
        let d = p.reschedule_delay(30);
        assert!(d < Duration::from_secs(301));
    }

    #[tokio::test]
    async fn test_execute_success_first_attempt() {
        let p = policy(JitterKind::Random);
        let outcome = execute(&p, || async { Ok::<_, anyhow::Error>(7) }).await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_execute_retries_until_success() {
        let p = RetryPolicy {
            base_delay: Duration::from_millis(1),
            jitter_width: Duration::from_millis(1),
            ..policy(JitterKind::Random)
        };
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let outcome = execute(&p, move || {
            let calls = Arc::clone(&calls_clone);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient")
                }
                Ok(())
            }
        })
        .await;
        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn test_execute_reports_exhaustion() {
        let p = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter_width: Duration::from_millis(1),
            ..policy(JitterKind::Random)
        };
        let outcome = execute(&p, || async { Err::<(), _>(anyhow::anyhow!("down")) }).await;
        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 3);
    }
}
