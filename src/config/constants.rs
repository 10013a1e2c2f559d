//! Configuration constants.
//!
//! Defaults for every recognized option, plus the fixed internal timing
//! parameters of the cooperative control loops.

use std::time::Duration;

// Dispatcher defaults
/// Maximum items claimed from the store per dispatcher cycle.
pub const DEFAULT_BATCH_SIZE: usize = 200;
/// Worker pool size (concurrent in-flight sends).
pub const DEFAULT_CONCURRENCY: usize = 6;
/// Dispatcher sleep when no items are eligible.
pub const IDLE_SLEEP: Duration = Duration::from_millis(300);

// Pacer / controller defaults
/// Rate the controller starts from once warmup completes.
pub const DEFAULT_INITIAL_RATE: u32 = 5;
/// Floor for the pacer rate. Zero is never permitted.
pub const DEFAULT_MIN_RATE: u32 = 1;
/// Ceiling for additive increase.
pub const DEFAULT_MAX_RATE: u32 = 100;
/// Rate the pacer is pinned to during warmup.
pub const DEFAULT_WARMUP_RATE: u32 = 1;
/// Warmup duration from process start.
pub const DEFAULT_WARMUP_DURATION_MS: u64 = 60_000;
/// Controller tick cadence after warmup.
pub const DEFAULT_RAMP_INTERVAL_MS: u64 = 30_000;
/// Tokens/sec added per healthy tick.
pub const DEFAULT_ADDITIVE_STEP: u32 = 1;
/// Rate multiplier applied on a degraded tick.
pub const DEFAULT_MULTIPLICATIVE_FACTOR: f64 = 0.5;
/// Windowed error rate above which the controller backs off.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.05;
/// Windowed p95 latency above which the controller backs off.
pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 400;
/// Sleep between token checks inside a blocking `acquire`.
pub const PACER_POLL_INTERVAL: Duration = Duration::from_millis(10);

// Circuit breaker defaults
/// Consecutive failures before the breaker opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;
/// How long the breaker stays open before probing.
pub const DEFAULT_OPEN_DURATION_MS: u64 = 30_000;
/// Length of the half-open probe window.
pub const DEFAULT_HALF_OPEN_DURATION_MS: u64 = 10_000;
/// Advisory pacer clamp while half-open.
pub const DEFAULT_HALF_OPEN_PROBE_RATE: u32 = 3;
/// Sleep between breaker checks while a worker is blocked.
pub const BREAKER_BLOCK_SPIN: Duration = Duration::from_millis(50);

// Retry defaults
/// Total send attempts an item may receive across both retry layers.
pub const DEFAULT_RETRY_MAX: u32 = 8;
/// Consecutive attempts a worker may make before yielding its slot.
/// Kept small so a stubborn item cannot pin a worker for long.
pub const DEFAULT_MAX_INFLIGHT_ATTEMPTS: u32 = 3;
/// Cap on the exponential backoff, in seconds.
pub const DEFAULT_BACKOFF_CAP_SECONDS: u64 = 300;
/// Backoff unit: delay is `min(2^attempt, cap) * base`.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
/// Width of the additive jitter range for the `random` jitter mode.
pub const DEFAULT_JITTER_MS: u64 = 1_000;

// Window / observability defaults
/// Retention horizon of the sliding signal window.
pub const DEFAULT_WINDOW_MS: u64 = 30_000;
/// Cadence of the periodic statistics snapshot.
pub const DEFAULT_STATS_INTERVAL_MS: u64 = 5_000;

// Transport defaults
/// Per-attempt timeout applied to the outbound send.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

// HTTP status codes (for clarity and consistency)
pub const HTTP_STATUS_TOO_MANY_REQUESTS: u16 = 429;
