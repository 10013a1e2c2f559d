//! Outbound transport boundary.
//!
//! The engine only ever sees an [`Outcome`]; whatever the HTTP client throws
//! is folded into the taxonomy here. The per-attempt timeout is enforced at
//! the client level, so a timeout surfaces as a transport error like any
//! other network failure.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::ClientBuilder;

use crate::config::HTTP_STATUS_TOO_MANY_REQUESTS;
use crate::error::InitError;
use crate::model::{Outcome, WorkItem};

/// Polymorphic transport: the real HTTP client in production, scripted fakes
/// in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one send attempt. Never panics; failures are outcomes.
    async fn send(&self, item: &WorkItem) -> Outcome;
}

/// Delivers payloads by POSTing them to a fixed endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Builds the transport with a per-attempt timeout.
    ///
    /// # Errors
    ///
    /// Returns `InitError::HttpClient` if client creation fails.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, InitError> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        Ok(HttpTransport {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, item: &WorkItem) -> Outcome {
        let started = Instant::now();
        let result = self
            .client
            .post(&self.endpoint)
            .body(item.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let retry_after = parse_retry_after(response.headers());
                classify_status(status, retry_after, started.elapsed())
            }
            Err(e) => Outcome::TransportError {
                message: e.to_string(),
            },
        }
    }
}

/// Maps a response status to an outcome.
///
/// 2xx succeeds; 429 and 5xx are server pressure (retriable, possibly with a
/// retry hint); everything else the client did wrong and is permanent.
pub(crate) fn classify_status(
    status: u16,
    retry_after: Option<Duration>,
    latency: Duration,
) -> Outcome {
    match status {
        200..=299 => Outcome::Success {
            latency_ms: latency.as_millis() as u64,
        },
        HTTP_STATUS_TOO_MANY_REQUESTS | 500..=599 => Outcome::ServerBusy {
            status,
            retry_after,
        },
        _ => Outcome::ClientReject { status },
    }
}

/// Parses a `Retry-After` header given in whole seconds. The HTTP-date form
/// is ignored.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
