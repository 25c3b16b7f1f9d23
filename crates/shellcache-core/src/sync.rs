//! Background sync.
//!
//! The foreground client registers tag-named work units; the host fires a
//! sync event for a tag once connectivity returns. The watchlist tag
//! refreshes the price snapshot and hands it to a [`SnapshotConsumer`].
//! Nothing here retries: a failed run is reported and the tag is consumed.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::WorkerError;
use crate::http::{Fetcher, Request};

/// Receives the snapshot fetched by a sync run.
#[async_trait]
pub trait SnapshotConsumer: Send + Sync {
    async fn consume(&self, tag: &str, snapshot: serde_json::Value) -> anyhow::Result<()>;
}

/// Consumer that only logs what arrived.
pub struct LoggingConsumer;

#[async_trait]
impl SnapshotConsumer for LoggingConsumer {
    async fn consume(&self, tag: &str, snapshot: serde_json::Value) -> anyhow::Result<()> {
        let items = match &snapshot {
            serde_json::Value::Array(items) => items.len(),
            serde_json::Value::Object(fields) => fields.len(),
            _ => 1,
        };
        info!(tag, items, "Sync snapshot received");
        Ok(())
    }
}

/// Result of one sync event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum SyncOutcome {
    Refreshed { tag: String },
    /// No work is known for this tag
    Ignored { tag: String },
}

pub struct SyncRetryQueue {
    registered: Mutex<BTreeSet<String>>,
    /// Tag that triggers the snapshot refresh
    snapshot_tag: String,
    snapshot_request: Request,
    fetcher: Arc<dyn Fetcher>,
    consumer: Arc<dyn SnapshotConsumer>,
}

impl SyncRetryQueue {
    pub fn new(
        snapshot_tag: &str,
        snapshot_request: Request,
        fetcher: Arc<dyn Fetcher>,
        consumer: Arc<dyn SnapshotConsumer>,
    ) -> Self {
        Self {
            registered: Mutex::new(BTreeSet::new()),
            snapshot_tag: snapshot_tag.to_string(),
            snapshot_request,
            fetcher,
            consumer,
        }
    }

    /// Record a tag. Returns false if it was already pending.
    pub fn register(&self, tag: &str) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag.to_string())
    }

    pub fn unregister(&self, tag: &str) -> bool {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag)
    }

    /// Pending tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Run the work for `tag`. The tag is consumed whatever the result.
    pub async fn on_sync(&self, tag: &str) -> Result<SyncOutcome, WorkerError> {
        self.unregister(tag);

        if tag != self.snapshot_tag {
            debug!(tag, "No sync work for tag");
            return Ok(SyncOutcome::Ignored {
                tag: tag.to_string(),
            });
        }

        let failed = |reason: String| WorkerError::Sync {
            tag: tag.to_string(),
            reason,
        };

        let response = self
            .fetcher
            .fetch(&self.snapshot_request)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.is_success() {
            return Err(WorkerError::sync_status(
                tag,
                response.status,
                &response.text(),
            ));
        }

        let snapshot: serde_json::Value = response
            .json_body()
            .map_err(|e| failed(format!("Invalid snapshot JSON: {}", e)))?;

        self.consumer
            .consume(tag, snapshot)
            .await
            .map_err(|e| failed(format!("{:#}", e)))?;

        info!(tag, url = %self.snapshot_request.url(), "Sync completed");
        Ok(SyncOutcome::Refreshed {
            tag: tag.to_string(),
        })
    }
}
