//! Sliding-window collector over per-request latency and outcome.
//!
//! Points older than the window duration are evicted FIFO on every read, so
//! derived signals always describe the recent past. Lifetime counters are
//! monotone and never evicted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct WindowPoint {
    at: Instant,
    latency_ms: u64,
    success: bool,
}

/// All derived metrics in one consistent read.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WindowSnapshot {
    /// Points currently retained.
    pub count: usize,
    /// Failures / points, `0.0` when empty.
    pub error_rate: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: u64,
    /// 99th percentile latency in milliseconds.
    pub p99_ms: u64,
    /// Mean latency in milliseconds.
    pub avg_ms: u64,
    /// Median latency in milliseconds.
    pub median_ms: u64,
    /// Points per second over the retained span.
    pub throughput_per_sec: f64,
}

/// Thread-safe sliding window of request outcomes.
pub struct SlidingWindow {
    points: Mutex<VecDeque<WindowPoint>>,
    window: Duration,
    total: AtomicU64,
    total_success: AtomicU64,
}

impl SlidingWindow {
    pub fn new(window: Duration) -> Self {
        SlidingWindow {
            points: Mutex::new(VecDeque::new()),
            window,
            total: AtomicU64::new(0),
            total_success: AtomicU64::new(0),
        }
    }

    /// Records one request outcome, tagged with the current time.
    pub async fn record(&self, latency_ms: u64, success: bool) {
        let mut points = self.points.lock().await;
        let now = Instant::now();
        Self::evict(&mut points, now, self.window);
        points.push_back(WindowPoint {
            at: now,
            latency_ms,
            success,
        });
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.total_success.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn evict(points: &mut VecDeque<WindowPoint>, now: Instant, window: Duration) {
        while let Some(front) = points.front() {
            if now.duration_since(front.at) > window {
                points.pop_front();
            } else {
                break;
            }
        }
    }

    /// Failures divided by points in the window. `0.0` when empty.
    pub async fn error_rate(&self) -> f64 {
        self.snapshot().await.error_rate
    }

    /// 95th percentile latency over the window, `0` when empty.
    pub async fn p95(&self) -> u64 {
        self.snapshot().await.p95_ms
    }

    /// 99th percentile latency over the window, `0` when empty.
    pub async fn p99(&self) -> u64 {
        self.snapshot().await.p99_ms
    }

    /// Mean latency over the window, `0` when empty.
    pub async fn avg(&self) -> u64 {
        self.snapshot().await.avg_ms
    }

    /// Median latency over the window, `0` when empty.
    pub async fn median(&self) -> u64 {
        self.snapshot().await.median_ms
    }

    /// Points per second across the retained span, `0.0` when empty.
    pub async fn throughput(&self) -> f64 {
        self.snapshot().await.throughput_per_sec
    }

    /// Points currently retained.
    pub async fn count(&self) -> usize {
        self.snapshot().await.count
    }

    /// Lifetime totals `(recorded, successes)`; never evicted.
    pub fn lifetime_totals(&self) -> (u64, u64) {
        (
            self.total.load(Ordering::Relaxed),
            self.total_success.load(Ordering::Relaxed),
        )
    }

    /// Evicts expired points and computes every derived metric at once.
    pub async fn snapshot(&self) -> WindowSnapshot {
        let mut points = self.points.lock().await;
        let now = Instant::now();
        Self::evict(&mut points, now, self.window);

        let count = points.len();
        if count == 0 {
            return WindowSnapshot::default();
        }

        let failures = points.iter().filter(|p| !p.success).count();
        let mut latencies: Vec<u64> = points.iter().map(|p| p.latency_ms).collect();
        latencies.sort_unstable();

        let sum: u64 = latencies.iter().sum();
        let span = now.duration_since(points.front().map(|p| p.at).unwrap_or(now));
        let throughput_per_sec = if span.as_secs_f64() > 0.0 {
            count as f64 / span.as_secs_f64()
        } else {
            0.0
        };

        WindowSnapshot {
            count,
            error_rate: failures as f64 / count as f64,
            p95_ms: percentile(&latencies, 0.95),
            p99_ms: percentile(&latencies, 0.99),
            avg_ms: sum / count as u64,
            median_ms: percentile(&latencies, 0.50),
            throughput_per_sec,
        }
    }
}

/// Percentile by `floor(n * p)` index into the sorted list, clamped to the
/// last element. Callers guarantee `sorted` is non-empty.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SlidingWindow {
        SlidingWindow::new(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_empty_window_is_all_zero() {
        let w = window();
        let snap = w.snapshot().await;
        assert_eq!(snap.count, 0);
        assert_eq!(snap.error_rate, 0.0);
        assert_eq!(snap.p95_ms, 0);
        assert_eq!(snap.p99_ms, 0);
        assert_eq!(snap.avg_ms, 0);
        assert_eq!(snap.median_ms, 0);
        assert_eq!(snap.throughput_per_sec, 0.0);
    }

    #[tokio::test]
    async fn test_error_rate() {
        let w = window();
        for _ in 0..7 {
            w.record(10, true).await;
        }
        for _ in 0..3 {
            w.record(10, false).await;
        }
        let rate = w.error_rate().await;
        assert!((rate - 0.3).abs() < 1e-9, "expected 0.3, got {rate}");
    }

    #[tokio::test]
    async fn test_percentile_index_is_floor_n_p() {
        let w = window();
        // latencies 1..=10 sorted; floor(10 * 0.95) = 9 -> value 10
        for ms in 1..=10u64 {
            w.record(ms, true).await;
        }
        let snap = w.snapshot().await;
        assert_eq!(snap.p95_ms, 10);
        assert_eq!(snap.p99_ms, 10);
        // floor(10 * 0.5) = 5 -> value 6
        assert_eq!(snap.median_ms, 6);
        assert_eq!(snap.avg_ms, 5); // 55 / 10
    }

    #[tokio::test]
    async fn test_single_point_percentiles() {
        let w = window();
        w.record(42, true).await;
        let snap = w.snapshot().await;
        assert_eq!(snap.p95_ms, 42);
        assert_eq!(snap.p99_ms, 42);
        assert_eq!(snap.median_ms, 42);
    }

    #[tokio::test]
    async fn test_eviction_drops_old_points() {
        let w = SlidingWindow::new(Duration::from_millis(50));
        w.record(10, false).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        w.record(20, true).await;

        let snap = w.snapshot().await;
        assert_eq!(snap.count, 1);
        assert_eq!(snap.error_rate, 0.0);
        // lifetime counters survive eviction
        assert_eq!(w.lifetime_totals(), (2, 1));
    }

    #[tokio::test]
    async fn test_repeated_reads_are_stable() {
        let w = window();
        for ms in [5u64, 15, 25] {
            w.record(ms, true).await;
        }
        let first = w.snapshot().await;
        let second = w.snapshot().await;
        assert_eq!(first.count, second.count);
        assert_eq!(first.p95_ms, second.p95_ms);
        assert_eq!(first.error_rate, second.error_rate);
        assert_eq!(first.median_ms, second.median_ms);
    }

    #[tokio::test]
    async fn test_throughput_positive_after_spaced_records() {
        let w = window();
        w.record(1, true).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        w.record(1, true).await;
        let t = w.throughput().await;
        assert!(t > 0.0, "throughput should be positive, got {t}");
        // two points over >= 50ms can never exceed 40/s
        assert!(t <= 40.0, "throughput implausibly high: {t}");
    }
}
