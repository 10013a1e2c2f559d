//! outbox_drain: adaptive throttling and retry pipeline for draining
//! outbound request backlogs.
//!
//! Application processes accumulate work while a downstream service is
//! unavailable; this library resumes delivery at a rate the downstream can
//! actually sustain. The pipeline is built from six coordinated parts: a
//! token-bucket pacer, a bounded worker pool over a pending work store, a
//! sliding-window signal collector, an AIMD rate controller with warmup, a
//! circuit breaker, and a per-item retry scheduler with exponential backoff
//! and jitter.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use outbox_drain::{Config, Engine, HttpTransport, SqliteWorkStore};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config {
//!     endpoint: "https://api.example.com/deliver".into(),
//!     ..Default::default()
//! };
//!
//! let store = SqliteWorkStore::connect(&config.db_path).await?;
//! store.run_migrations().await?;
//! let transport = HttpTransport::new(
//!     config.endpoint.clone(),
//!     Duration::from_secs(config.timeout_seconds),
//! )?;
//!
//! let engine = Engine::new(config, Arc::new(store), Arc::new(transport));
//! let report = engine.run(CancellationToken::new()).await?;
//! println!("delivered {} items", report.sent);
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

mod breaker;
pub mod config;
mod controller;
mod engine;
mod error;
mod model;
mod pacer;
pub mod retry;
mod store;
mod transport;
mod window;

// Re-export public API
pub use breaker::{BreakerPhase, CircuitBreaker};
pub use config::{init_logger_with, Config, LogFormat, LogLevel};
pub use controller::{RateChange, RateChangeReason, RateController, Signals};
pub use engine::{DrainReport, Engine};
pub use error::InitError;
pub use model::{Outcome, StoreCounts, WorkItem, WorkStatus};
pub use pacer::TokenBucket;
pub use retry::{JitterKind, RetryPolicy};
pub use store::{MemoryWorkStore, SqliteWorkStore, StoreError, WorkStore};
pub use transport::{HttpTransport, Transport};
pub use window::{SlidingWindow, WindowSnapshot};
