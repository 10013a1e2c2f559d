//! Typed initialization failures.
//!
//! Runtime failures stay close to their component (`StoreError` on the
//! store, outcomes on the transport); this module only covers the things
//! that can go wrong while standing the pipeline up.

use thiserror::Error;

use crate::store::StoreError;

/// Error types for initialization failures.
#[derive(Error, Debug)]
pub enum InitError {
    /// Error initializing the logger.
    #[error("logger initialization error: {0}")]
    Logger(#[from] log::SetLoggerError),

    /// Error initializing the HTTP client.
    #[error("HTTP client initialization error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Error opening the outbox database.
    #[error("outbox database initialization error: {0}")]
    Pool(#[from] StoreError),
}
