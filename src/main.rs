use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use outbox_drain::config::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_INITIAL_RATE, DEFAULT_MAX_RATE,
    DEFAULT_MIN_RATE, DEFAULT_RETRY_MAX, DEFAULT_TIMEOUT_SECONDS, DEFAULT_WARMUP_DURATION_MS,
    DEFAULT_WARMUP_RATE,
};
use outbox_drain::{
    init_logger_with, Config, Engine, HttpTransport, JitterKind, LogFormat, LogLevel,
    SqliteWorkStore, WorkItem, WorkStore,
};

#[derive(Debug, Parser)]
#[command(
    name = "outbox_drain",
    about = "Drains an outbox of pending requests against a remote endpoint without a thundering herd."
)]
struct Opt {
    /// Endpoint payloads are POSTed to
    #[arg(long)]
    endpoint: String,

    /// Outbox database path (SQLite file)
    #[arg(long, value_parser, default_value = "./outbox.db")]
    db_path: PathBuf,

    /// Seed the outbox with one payload per line from this file before draining
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log level: error|warn|info|debug|trace
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log format: plain|json
    #[arg(long, value_enum, default_value_t = LogFormat::Plain)]
    log_format: LogFormat,

    /// Maximum items claimed per dispatcher cycle
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Concurrent workers
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Rate to ramp from once warmup completes (requests per second)
    #[arg(long, default_value_t = DEFAULT_INITIAL_RATE)]
    initial_rate: u32,

    /// Rate floor
    #[arg(long, default_value_t = DEFAULT_MIN_RATE)]
    min_rate: u32,

    /// Rate ceiling
    #[arg(long, default_value_t = DEFAULT_MAX_RATE)]
    max_rate: u32,

    /// Rate during warmup
    #[arg(long, default_value_t = DEFAULT_WARMUP_RATE)]
    warmup_rate: u32,

    /// Warmup duration in milliseconds
    #[arg(long, default_value_t = DEFAULT_WARMUP_DURATION_MS)]
    warmup_duration_ms: u64,

    /// Total attempts per item before dead-lettering
    #[arg(long, default_value_t = DEFAULT_RETRY_MAX)]
    retry_max: u32,

    /// Jitter mode for retry backoff: random|full|decorrelated
    #[arg(long, value_enum, default_value_t = JitterKind::Random)]
    jitter: JitterKind,

    /// Per-attempt timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    timeout_seconds: u64,
}

impl Opt {
    fn into_config(self) -> Config {
        Config {
            endpoint: self.endpoint,
            db_path: self.db_path,
            log_level: self.log_level,
            log_format: self.log_format,
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            initial_rate: self.initial_rate,
            min_rate: self.min_rate,
            max_rate: self.max_rate,
            warmup_rate: self.warmup_rate,
            warmup_duration_ms: self.warmup_duration_ms,
            retry_max: self.retry_max,
            jitter: self.jitter,
            timeout_seconds: self.timeout_seconds,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    init_logger_with(opt.log_level.clone().into(), opt.log_format.clone())
        .context("Failed to initialize logger")?;

    let seed_path = opt.seed.clone();
    let config = opt.into_config();

    let store = SqliteWorkStore::connect(&config.db_path)
        .await
        .context("Failed to open outbox database")?;
    store
        .run_migrations()
        .await
        .context("Failed to run outbox migrations")?;

    if let Some(path) = seed_path {
        let inserted = seed_outbox(&store, &path)
            .await
            .context("Failed to seed outbox")?;
        info!("Seeded {inserted} items from {}", path.display());
    }
    store
        .recover_inflight()
        .await
        .context("Failed to recover in-flight items")?;

    let transport = HttpTransport::new(
        config.endpoint.clone(),
        Duration::from_secs(config.timeout_seconds),
    )
    .context("Failed to initialize HTTP client")?;

    let store = Arc::new(store);
    let backlog = store.counts().await?.backlog();
    info!(
        "Draining {backlog} pending items against {} (concurrency {}, {}-{} rps)",
        config.endpoint, config.concurrency, config.min_rate, config.max_rate
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let engine = Engine::new(
        config,
        Arc::clone(&store) as Arc<dyn WorkStore>,
        Arc::new(transport),
    );
    let report = engine.run(shutdown).await?;

    let counts = store.counts().await?;
    info!(
        "Final tallies: sent={} failed={} dlq={} pending={}",
        counts.sent, counts.failed, counts.dead_lettered, counts.pending
    );
    info!(
        "Run complete: {} sent, {} dead-lettered in {:.2}s",
        report.sent, report.dead_lettered, report.elapsed_seconds
    );

    Ok(())
}

/// Inserts one pending item per non-empty, non-comment line of `path`.
/// Item ids are derived from the line number, so re-seeding the same file
/// is idempotent.
async fn seed_outbox(store: &SqliteWorkStore, path: &std::path::Path) -> Result<u64> {
    let file = tokio::fs::File::open(path)
        .await
        .context("Failed to open seed file")?;
    let mut lines = BufReader::new(file).lines();
    let mut items = Vec::new();
    let mut line_no = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        items.push(WorkItem::pending(
            format!("item-{line_no:06}"),
            trimmed.as_bytes().to_vec(),
        ));
    }
    Ok(store.seed(&items).await?)
}

/// First SIGTERM/SIGINT drains gracefully; a second signal exits at once.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("failed to install SIGTERM handler: {e}");
                    return;
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("failed to install SIGINT handler: {e}");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => info!("SIGTERM received, draining in-flight work"),
                _ = sigint.recv() => info!("SIGINT received, draining in-flight work"),
            }
            shutdown.cancel();

            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            log::warn!("second signal received, exiting immediately");
            std::process::exit(1);
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, draining in-flight work");
                shutdown.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("second interrupt received, exiting immediately");
                std::process::exit(1);
            }
        }
    });
}
