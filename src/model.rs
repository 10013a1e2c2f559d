//! Core data model: work items, send outcomes, and store-level counts.

use std::time::Duration;

use serde::Serialize;
use strum_macros::EnumIter;

/// Delivery state of a single work item.
///
/// `Pending` and `Failed` items are eligible for claiming (subject to their
/// `next_attempt_at`); `InFlight` items are owned by a worker; `Sent` and
/// `DeadLettered` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum WorkStatus {
    /// Never attempted, ready for claiming.
    Pending,
    /// Claimed by a worker; no other worker may touch the item.
    InFlight,
    /// Delivered successfully (terminal).
    Sent,
    /// Attempted and failed; eligible again once `next_attempt_at` passes.
    Failed,
    /// Given up on; surfaced for manual handling (terminal).
    DeadLettered,
}

impl WorkStatus {
    /// Stable textual form used by the SQLite store and log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::InFlight => "in_flight",
            WorkStatus::Sent => "sent",
            WorkStatus::Failed => "failed",
            WorkStatus::DeadLettered => "dead_lettered",
        }
    }

    /// Parses the textual form produced by [`WorkStatus::as_str`].
    pub fn parse(s: &str) -> Option<WorkStatus> {
        match s {
            "pending" => Some(WorkStatus::Pending),
            "in_flight" => Some(WorkStatus::InFlight),
            "sent" => Some(WorkStatus::Sent),
            "failed" => Some(WorkStatus::Failed),
            "dead_lettered" => Some(WorkStatus::DeadLettered),
            _ => None,
        }
    }

    /// Terminal statuses are never claimed again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkStatus::Sent | WorkStatus::DeadLettered)
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of deliverable work.
///
/// The `attempts` counter spans both retry layers (in-flight and
/// store-rescheduled), so `attempts` never exceeds the configured retry
/// maximum across the item's whole lifetime.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Stable identifier, unique within the store.
    pub id: String,
    /// Opaque payload handed to the transport unmodified.
    pub payload: Vec<u8>,
    /// Current delivery state.
    pub status: WorkStatus,
    /// Total send attempts made so far, across all claims.
    pub attempts: u32,
    /// Earliest next attempt, epoch milliseconds. Zero means "immediately".
    pub next_attempt_at: i64,
}

impl WorkItem {
    /// Creates a fresh pending item that is immediately eligible.
    pub fn pending(id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        WorkItem {
            id: id.into(),
            payload: payload.into(),
            status: WorkStatus::Pending,
            attempts: 0,
            next_attempt_at: 0,
        }
    }
}

/// Result of one send attempt. Ephemeral: consumed by the worker that made
/// the attempt and never stored.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The downstream accepted the request.
    Success {
        /// Round-trip latency of the attempt in milliseconds.
        latency_ms: u64,
    },
    /// The downstream is overloaded (HTTP 429 or 5xx). Retriable.
    ServerBusy {
        /// HTTP status code that triggered this outcome.
        status: u16,
        /// Server-supplied earliest-retry hint, if any.
        retry_after: Option<Duration>,
    },
    /// The request itself was rejected (4xx other than 429). Not retriable.
    ClientReject {
        /// HTTP status code that triggered this outcome.
        status: u16,
    },
    /// Network-level failure or timeout. Retriable.
    TransportError {
        /// Human-readable description of the failure.
        message: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Whether another attempt may eventually succeed.
    ///
    /// Server overload and transport failures are transient; a client
    /// rejection is permanent and goes straight to the dead-letter queue.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Outcome::ServerBusy { .. } | Outcome::TransportError { .. }
        )
    }

    /// Server-supplied retry hint, when present.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Outcome::ServerBusy { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success { latency_ms } => write!(f, "success ({latency_ms}ms)"),
            Outcome::ServerBusy { status, .. } => write!(f, "server busy (status {status})"),
            Outcome::ClientReject { status } => write!(f, "client reject (status {status})"),
            Outcome::TransportError { message } => write!(f, "transport error: {message}"),
        }
    }
}

/// Per-status item counts reported by a work store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead_lettered: u64,
}

impl StoreCounts {
    /// Items still awaiting delivery (claimed or not).
    pub fn backlog(&self) -> u64 {
        self.pending + self.failed
    }

    pub fn total(&self) -> u64 {
        self.pending + self.in_flight + self.sent + self.failed + self.dead_lettered
    }
}
