//! Configuration and logger setup.

mod constants;
mod types;

pub use constants::*;
pub use types::{Config, LogFormat, LogLevel};

use std::io::Write;

use colored::Colorize;
use log::LevelFilter;

use crate::error::InitError;

/// Initializes the logger with the specified level and format.
///
/// Configures `env_logger` with custom formatting. Supports both plain text
/// (with colors and emojis) and JSON formats for structured logging. Noisy
/// dependency modules are filtered down independently of the application
/// level.
///
/// # Arguments
///
/// * `level` - Minimum log level to display
/// * `format` - Log format (Plain or Json)
///
/// # Errors
///
/// Returns `InitError::Logger` if a logger has already been installed.
pub fn init_logger_with(level: LevelFilter, format: LogFormat) -> Result<(), InitError> {
    colored::control::set_override(true);

    let mut builder = env_logger::Builder::new();

    builder.filter_level(level);
    builder.filter_module("sqlx", LevelFilter::Warn);
    builder.filter_module("reqwest", LevelFilter::Info);
    builder.filter_module("hyper", LevelFilter::Info);
    builder.filter_module("outbox_drain", level);

    match format {
        LogFormat::Json => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{{\"ts\":{},\"level\":\"{}\",\"target\":\"{}\",\"msg\":{}}}",
                    chrono::Utc::now().timestamp_millis(),
                    record.level(),
                    record.target(),
                    serde_json::to_string(&record.args().to_string())
                        .unwrap_or_else(|_| "\"\"".into())
                )
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                let level = record.level();
                let colored_level = match level {
                    log::Level::Error => level.to_string().red(),
                    log::Level::Warn => level.to_string().yellow(),
                    log::Level::Info => level.to_string().green(),
                    log::Level::Debug => level.to_string().blue(),
                    log::Level::Trace => level.to_string().purple(),
                };

                let emoji = match level {
                    log::Level::Error => "❌",
                    log::Level::Warn => "⚠️",
                    log::Level::Info => "✔️",
                    log::Level::Debug => "🔍",
                    log::Level::Trace => "🔬",
                };

                writeln!(
                    buf,
                    "{} {} [{}] {}",
                    emoji,
                    record.target().cyan(),
                    colored_level,
                    record.args()
                )
            });
        }
    }

    builder.try_init()?;

    Ok(())
}
