//! Configuration types.
//!
//! This module defines the library [`Config`] struct and the enums used for
//! command-line argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::config::constants::*;
use crate::retry::JitterKind;

/// Logging level for the application.
///
/// Controls the verbosity of log output, from most restrictive (Error) to
/// most verbose (Trace).
#[derive(Clone, Debug, ValueEnum)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// - `Plain`: human-readable format with colors (default)
/// - `Json`: structured JSON format for machine parsing
#[derive(Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Library configuration (no CLI dependencies).
///
/// This is the core configuration struct used by the engine. It can be
/// constructed programmatically without any CLI dependencies; the binary
/// maps its command-line flags onto it.
///
/// # Examples
///
/// ```no_run
/// use outbox_drain::Config;
///
/// let config = Config {
///     endpoint: "https://api.example.com/deliver".into(),
///     concurrency: 8,
///     max_rate: 50,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint the HTTP transport delivers payloads to.
    pub endpoint: String,

    /// SQLite outbox path (durable store).
    pub db_path: PathBuf,

    /// Log level
    pub log_level: LogLevel,

    /// Log format
    pub log_format: LogFormat,

    /// Maximum items claimed per dispatcher cycle.
    pub batch_size: usize,

    /// Worker pool size.
    pub concurrency: usize,

    /// Rate the controller starts from once warmup completes.
    pub initial_rate: u32,

    /// Pacer rate floor (never below 1).
    pub min_rate: u32,

    /// Pacer rate ceiling.
    pub max_rate: u32,

    /// Rate the pacer is pinned to during warmup.
    pub warmup_rate: u32,

    /// Warmup duration in milliseconds.
    pub warmup_duration_ms: u64,

    /// Controller tick cadence in milliseconds.
    pub ramp_interval_ms: u64,

    /// Tokens/sec added per healthy controller tick.
    pub additive_step: u32,

    /// Rate multiplier applied on a degraded controller tick.
    pub multiplicative_factor: f64,

    /// Windowed error rate above which the controller backs off (0.0-1.0).
    pub error_threshold: f64,

    /// Windowed p95 latency above which the controller backs off.
    pub latency_threshold_ms: u64,

    /// Consecutive failures before the circuit breaker opens.
    pub failure_threshold: u32,

    /// How long the breaker stays open before probing, in milliseconds.
    pub open_duration_ms: u64,

    /// Length of the half-open probe window in milliseconds.
    pub half_open_duration_ms: u64,

    /// Pacer clamp while the breaker is half-open.
    pub half_open_probe_rate: u32,

    /// Total send attempts an item may receive across both retry layers.
    pub retry_max: u32,

    /// Consecutive attempts a worker may make before yielding its slot.
    pub max_inflight_attempts: u32,

    /// Cap on the exponential backoff, in seconds.
    pub backoff_cap_seconds: u64,

    /// Backoff unit in milliseconds.
    pub base_delay_ms: u64,

    /// Width of the additive jitter range in milliseconds.
    pub jitter_ms: u64,

    /// Jitter mode for in-flight retry delays.
    pub jitter: JitterKind,

    /// Retention horizon of the sliding signal window in milliseconds.
    pub window_ms: u64,

    /// Cadence of the periodic statistics snapshot in milliseconds.
    pub stats_interval_ms: u64,

    /// Per-attempt transport timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            db_path: PathBuf::from("./outbox.db"),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            initial_rate: DEFAULT_INITIAL_RATE,
            min_rate: DEFAULT_MIN_RATE,
            max_rate: DEFAULT_MAX_RATE,
            warmup_rate: DEFAULT_WARMUP_RATE,
            warmup_duration_ms: DEFAULT_WARMUP_DURATION_MS,
            ramp_interval_ms: DEFAULT_RAMP_INTERVAL_MS,
            additive_step: DEFAULT_ADDITIVE_STEP,
            multiplicative_factor: DEFAULT_MULTIPLICATIVE_FACTOR,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            latency_threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            open_duration_ms: DEFAULT_OPEN_DURATION_MS,
            half_open_duration_ms: DEFAULT_HALF_OPEN_DURATION_MS,
            half_open_probe_rate: DEFAULT_HALF_OPEN_PROBE_RATE,
            retry_max: DEFAULT_RETRY_MAX,
            max_inflight_attempts: DEFAULT_MAX_INFLIGHT_ATTEMPTS,
            backoff_cap_seconds: DEFAULT_BACKOFF_CAP_SECONDS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            jitter_ms: DEFAULT_JITTER_MS,
            jitter: JitterKind::Random,
            window_ms: DEFAULT_WINDOW_MS,
            stats_interval_ms: DEFAULT_STATS_INTERVAL_MS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl Config {
    pub fn warmup_duration(&self) -> Duration {
        Duration::from_millis(self.warmup_duration_ms)
    }

    pub fn ramp_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_interval_ms)
    }

    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(
            log::LevelFilter::from(LogLevel::Error),
            log::LevelFilter::Error
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Warn),
            log::LevelFilter::Warn
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Info),
            log::LevelFilter::Info
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Debug),
            log::LevelFilter::Debug
        );
        assert_eq!(
            log::LevelFilter::from(LogLevel::Trace),
            log::LevelFilter::Trace
        );
    }

    #[test]
    fn test_config_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.concurrency, 6);
        assert_eq!(config.initial_rate, 5);
        assert_eq!(config.min_rate, 1);
        assert_eq!(config.max_rate, 100);
        assert_eq!(config.warmup_rate, 1);
        assert_eq!(config.warmup_duration_ms, 60_000);
        assert_eq!(config.ramp_interval_ms, 30_000);
        assert_eq!(config.additive_step, 1);
        assert_eq!(config.multiplicative_factor, 0.5);
        assert_eq!(config.error_threshold, 0.05);
        assert_eq!(config.latency_threshold_ms, 400);
        assert_eq!(config.failure_threshold, 10);
        assert_eq!(config.open_duration_ms, 30_000);
        assert_eq!(config.half_open_duration_ms, 10_000);
        assert_eq!(config.half_open_probe_rate, 3);
        assert_eq!(config.retry_max, 8);
        assert_eq!(config.backoff_cap_seconds, 300);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.jitter_ms, 1_000);
        assert_eq!(config.window_ms, 30_000);
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config {
            warmup_duration_ms: 2_000,
            ramp_interval_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(config.warmup_duration(), Duration::from_secs(2));
        assert_eq!(config.ramp_interval(), Duration::from_secs(10));
    }
}
