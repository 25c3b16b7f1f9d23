use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::WorkerError;

/// Worker lifecycle.
///
/// `Parsed -> Installing -> Installed -> Activating -> Activated`, with
/// `Redundant` reachable from anywhere on teardown. A failed install falls
/// back to `Parsed` and a failed activation to `Installed` so the host can
/// retry the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

impl WorkerState {
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;

        match (self, next) {
            (Redundant, _) => false,
            (_, Redundant) => true,
            (Parsed, Installing)
            | (Installing, Installed)
            | (Installing, Parsed)
            | (Installed, Activating)
            | (Activating, Activated)
            | (Activating, Installed) => true,
            _ => false,
        }
    }

    /// Only an activated worker serves from the store.
    pub fn is_active(self) -> bool {
        self == WorkerState::Activated
    }
}

/// Shared lifecycle state. Observers subscribe to a `watch` channel so
/// fetches can wait out an activation in progress.
pub(crate) struct Lifecycle {
    tx: watch::Sender<WorkerState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(WorkerState::Parsed);
        Self { tx }
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.tx.subscribe()
    }

    /// Move to `to`, returning the previous state.
    pub(crate) fn transition(&self, to: WorkerState) -> Result<WorkerState, WorkerError> {
        let mut outcome = Err(WorkerError::Lifecycle { from: to, to });
        self.tx.send_if_modified(|state| {
            let from = *state;
            if from.can_transition_to(to) {
                *state = to;
                outcome = Ok(from);
                true
            } else {
                outcome = Err(WorkerError::Lifecycle { from, to });
                false
            }
        });

        if let Ok(from) = &outcome {
            debug!(?from, ?to, "Worker state changed");
        }
        outcome
    }

    /// Wait until no activation is in progress and return the state then.
    pub(crate) async fn settled(&self) -> WorkerState {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|state| *state != WorkerState::Activating)
            .await
            .map(|state| *state);
        // The sender lives as long as `self`, so the channel cannot close here
        result.unwrap_or(WorkerState::Redundant)
    }
}
