//! Host-side collaborators: the window registry and the notifier.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;
use url::Url;

use shellcache_core::{ClientSurface, ClientSurfaces, Notification, Notifier};

/// A focus or open performed on behalf of the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum SurfaceOp {
    Focus { id: String },
    Open { id: String, url: String },
}

/// In-memory list of open windows.
///
/// The host has no real windows; it tracks the ones it was told about and
/// records what the worker asked it to do with them.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<Vec<ClientSurface>>,
    ops: Mutex<Vec<SurfaceOp>>,
    next_id: AtomicU64,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a window at `url`.
    pub fn attach(&self, url: &str) -> ClientSurface {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let surface = ClientSurface {
            id: format!("surface-{}", id),
            url: url.to_string(),
        };
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(surface.clone());
        surface
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, op: SurfaceOp) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }
}

#[async_trait]
impl ClientSurfaces for SurfaceRegistry {
    async fn match_all(&self) -> Vec<ClientSurface> {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn focus(&self, id: &str) -> bool {
        let known = self
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|s| s.id == id);
        if known {
            info!(surface = id, "Focusing surface");
            self.record(SurfaceOp::Focus { id: id.to_string() });
        }
        known
    }

    async fn open_window(&self, url: &Url) -> Option<ClientSurface> {
        let surface = self.attach(url.as_str());
        info!(surface = %surface.id, url = %surface.url, "Opening surface");
        self.record(SurfaceOp::Open {
            id: surface.id.clone(),
            url: surface.url.clone(),
        });
        Some(surface)
    }
}

/// Notifier that writes notifications to the log.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn show(&self, notification: &Notification) {
        info!(
            title = %notification.title,
            body = %notification.body,
            tag = %notification.tag,
            "Notification"
        );
    }

    async fn close(&self, tag: &str) {
        info!(tag, "Notification closed");
    }
}
