//! Error types and the single failure-classification policy.
//!
//! Every event handler funnels its failure through [`settle`], which
//! classifies it into one of four [`FailureKind`]s and decides whether it is
//! absorbed (logged) or handed back to the host.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::utils::format::truncate_string;
use crate::worker::{EventKind, EventOutcome, WorkerState};

/// Maximum length for response bodies quoted in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Origin unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Response not cacheable: {0}")]
    Ineligible(String),

    #[error("Generation {0} was deleted")]
    GenerationDeleted(String),

    #[error("Failed to persist generation {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Failed to serialize generation {0}: {1}")]
    Serialize(String, #[source] serde_json::Error),
}

/// Aggregate failure of install-time population.
///
/// Every seed key is attempted; this lists the ones that did not make it
/// into the generation.
#[derive(Error, Debug)]
#[error("{} of {} seed keys failed to populate generation {generation}", .failures.len(), .attempted)]
pub struct PopulateError {
    pub generation: String,
    pub attempted: usize,
    pub failures: Vec<(String, String)>,
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Transport(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Install(#[from] PopulateError),

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("Sync task '{tag}' failed: {reason}")]
    Sync { tag: String, reason: String },

    #[error("Invalid lifecycle transition from {from:?} to {to:?}")]
    Lifecycle { from: WorkerState, to: WorkerState },
}

impl WorkerError {
    /// Build a sync failure from an unexpected HTTP status and body.
    pub fn sync_status(tag: &str, status: u16, body: &str) -> Self {
        WorkerError::Sync {
            tag: tag.to_string(),
            reason: format!(
                "Status {}: {}",
                status,
                truncate_string(body, MAX_ERROR_BODY_LENGTH)
            ),
        }
    }
}

/// The four failure kinds every handler recovers from the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// Network unreachable, timeout, DNS failure
    TransportFailure,
    /// Malformed push payload or control message
    DecodeFailure,
    /// A store write, population or generation switch failed
    StoreWriteFailure,
    /// Deferred sync work failed
    SyncTaskFailure,
}

impl FailureKind {
    /// Whether a failure of this kind, raised while handling `event`, is
    /// returned to the host instead of being absorbed.
    ///
    /// Only install and activate may fail upward so the host can retry the
    /// whole lifecycle step.
    pub fn propagates(self, event: EventKind) -> bool {
        matches!(
            (self, event),
            (
                FailureKind::StoreWriteFailure,
                EventKind::Install | EventKind::Activate
            )
        )
    }
}

/// Classify any worker error into its taxonomy kind.
pub fn classify(err: &WorkerError) -> FailureKind {
    match err {
        WorkerError::Transport(_) => FailureKind::TransportFailure,
        WorkerError::Decode { .. } => FailureKind::DecodeFailure,
        WorkerError::Store(_) | WorkerError::Install(_) | WorkerError::Lifecycle { .. } => {
            FailureKind::StoreWriteFailure
        }
        WorkerError::Sync { .. } => FailureKind::SyncTaskFailure,
    }
}

/// Apply the recovery policy to a handler failure.
///
/// Absorbed failures are logged and turned into [`EventOutcome::Recovered`];
/// the rest are returned as-is.
pub fn settle(event: EventKind, err: WorkerError) -> Result<EventOutcome, WorkerError> {
    let kind = classify(&err);
    if kind.propagates(event) {
        error!(?event, ?kind, error = %err, "Event handler failed");
        return Err(err);
    }
    warn!(?event, ?kind, error = %err, "Event handler failure absorbed");
    Ok(EventOutcome::Recovered(kind))
}
