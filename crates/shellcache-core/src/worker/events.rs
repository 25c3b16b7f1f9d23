use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::error;

use crate::control::{ControlMessage, ControlReply};
use crate::error::{FailureKind, WorkerError};
use crate::http::Request;
use crate::notify::{ClickOutcome, Notification};
use crate::strategy::{RouteSource, RoutedResponse};
use crate::sync::SyncOutcome;

/// Everything the host can deliver to the worker.
#[derive(Debug)]
pub enum HostEvent {
    Install,
    Activate,
    /// An intercepted request; the routed response goes to `respond_to`
    Fetch {
        request: Request,
        respond_to: oneshot::Sender<RoutedResponse>,
    },
    Push {
        data: Option<Vec<u8>>,
    },
    NotificationClick {
        tag: String,
        action: Option<String>,
    },
    Sync {
        tag: String,
    },
    Message {
        message: ControlMessage,
        reply: Option<oneshot::Sender<ControlReply>>,
    },
}

impl HostEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HostEvent::Install => EventKind::Install,
            HostEvent::Activate => EventKind::Activate,
            HostEvent::Fetch { .. } => EventKind::Fetch,
            HostEvent::Push { .. } => EventKind::Push,
            HostEvent::NotificationClick { .. } => EventKind::NotificationClick,
            HostEvent::Sync { .. } => EventKind::Sync,
            HostEvent::Message { .. } => EventKind::Message,
        }
    }

    /// Build a fetch event and the receiver its response arrives on.
    pub fn fetch(request: Request) -> (Self, oneshot::Receiver<RoutedResponse>) {
        let (respond_to, rx) = oneshot::channel();
        (
            HostEvent::Fetch {
                request,
                respond_to,
            },
            rx,
        )
    }
}

/// Key of the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
    Sync,
    Message,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notification-click",
            EventKind::Sync => "sync",
            EventKind::Message => "message",
        }
    }
}

/// What handling an event achieved.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "kebab-case")]
pub enum EventOutcome {
    Installed {
        stored: usize,
    },
    Activated {
        removed: Vec<String>,
    },
    Fetched {
        source: RouteSource,
        status: u16,
    },
    Shown(Notification),
    Clicked(ClickOutcome),
    Synced(SyncOutcome),
    Controlled {
        message: ControlMessage,
        reply: Option<ControlReply>,
    },
    /// Nothing to do for this event
    Ignored,
    /// The handler failed and the failure was absorbed
    Recovered(FailureKind),
    /// The handler task was cancelled before finishing
    Aborted,
}

/// Handle the host awaits to keep the worker alive until a handler is done.
pub struct WaitUntil {
    kind: EventKind,
    handle: JoinHandle<Result<EventOutcome, WorkerError>>,
}

impl WaitUntil {
    pub(crate) fn new(kind: EventKind, handle: JoinHandle<Result<EventOutcome, WorkerError>>) -> Self {
        Self { kind, handle }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the handler. A panic inside it is resumed on the caller.
    pub async fn wait(self) -> Result<EventOutcome, WorkerError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                error!(kind = ?self.kind, "Event handler panicked");
                std::panic::resume_unwind(e.into_panic())
            }
            Err(_) => Ok(EventOutcome::Aborted),
        }
    }
}
