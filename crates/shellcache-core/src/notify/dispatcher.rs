use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NotificationDefaults;
use crate::error::WorkerError;

use super::payload::{NotificationAction, NotificationPayload};

/// Action name that dismisses a notification without opening anything.
pub const DISMISS_ACTION: &str = "close";

/// Action name that brings the app to the foreground.
pub const OPEN_ACTION: &str = "open";

/// Everything the host needs to render a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,
    /// Stays on screen until the user acts on it
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub data: serde_json::Value,
}

impl Notification {
    /// Merge a decoded payload over the configured defaults.
    pub fn build(payload: NotificationPayload, defaults: &NotificationDefaults) -> Self {
        let actions = match payload.actions {
            Some(actions) if !actions.is_empty() => actions,
            _ => vec![
                NotificationAction::new(OPEN_ACTION, "Open").with_icon(&defaults.icon),
                NotificationAction::new(DISMISS_ACTION, "Close"),
            ],
        };

        Self {
            title: payload.title.unwrap_or_else(|| defaults.title.clone()),
            body: payload.body.unwrap_or_else(|| defaults.body.clone()),
            icon: payload.icon.unwrap_or_else(|| defaults.icon.clone()),
            badge: payload.badge.unwrap_or_else(|| defaults.badge.clone()),
            tag: payload.tag.unwrap_or_else(|| defaults.tag.clone()),
            vibrate: defaults.vibrate.clone(),
            require_interaction: true,
            actions,
            data: payload
                .data
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        }
    }
}

/// A window of the app known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSurface {
    pub id: String,
    pub url: String,
}

/// Renders and dismisses notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, notification: &Notification);
    async fn close(&self, tag: &str);
}

/// The host's open windows.
#[async_trait]
pub trait ClientSurfaces: Send + Sync {
    async fn match_all(&self) -> Vec<ClientSurface>;
    /// Returns false when the surface no longer exists.
    async fn focus(&self, id: &str) -> bool;
    async fn open_window(&self, url: &Url) -> Option<ClientSurface>;
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ClickOutcome {
    /// The dismiss action; nothing was focused or opened
    Dismissed,
    Focused { surface: ClientSurface },
    Opened { surface: ClientSurface },
    /// The host could not open a window
    Unavailable,
}

/// Turns push messages into notifications and clicks into window focus.
pub struct NotificationDispatcher {
    defaults: NotificationDefaults,
    /// Registered scope; a surface at exactly this URL is reused
    scope: Url,
    /// Where a new surface is opened
    root: Url,
    notifier: Arc<dyn Notifier>,
    surfaces: Arc<dyn ClientSurfaces>,
}

impl NotificationDispatcher {
    pub fn new(
        defaults: NotificationDefaults,
        scope: Url,
        root: Url,
        notifier: Arc<dyn Notifier>,
        surfaces: Arc<dyn ClientSurfaces>,
    ) -> Self {
        Self {
            defaults,
            scope,
            root,
            notifier,
            surfaces,
        }
    }

    /// Decode a push message.
    ///
    /// An empty push decodes to all defaults. Mistyped fields in a JSON
    /// object fall back to their defaults. Anything that is not a JSON
    /// object is shown as plain text, and the decode error is returned
    /// alongside so the caller can report it.
    pub fn decode(data: Option<&[u8]>) -> (NotificationPayload, Option<WorkerError>) {
        match data {
            None => (NotificationPayload::default(), None),
            Some(bytes) if bytes.is_empty() => (NotificationPayload::default(), None),
            Some(bytes) => match NotificationPayload::from_json(bytes) {
                Ok(payload) => (payload, None),
                Err(e) => (NotificationPayload::from_text(bytes), Some(e)),
            },
        }
    }

    pub async fn show(&self, payload: NotificationPayload) -> Notification {
        let notification = Notification::build(payload, &self.defaults);
        info!(title = %notification.title, tag = %notification.tag, "Showing notification");
        self.notifier.show(&notification).await;
        notification
    }

    /// Handle a click on the notification tagged `tag`.
    ///
    /// The notification is always closed first. Unless the dismiss action
    /// was chosen, exactly one surface ends up focused or opened.
    pub async fn click(&self, tag: &str, action: Option<&str>) -> ClickOutcome {
        self.notifier.close(tag).await;

        if action == Some(DISMISS_ACTION) {
            debug!(tag, "Notification dismissed");
            return ClickOutcome::Dismissed;
        }

        for surface in self.surfaces.match_all().await {
            if surface.url != self.scope.as_str() {
                continue;
            }
            if self.surfaces.focus(&surface.id).await {
                debug!(surface = %surface.id, "Focused existing surface");
                return ClickOutcome::Focused { surface };
            }
            warn!(surface = %surface.id, "Surface vanished before focus");
        }

        match self.surfaces.open_window(&self.root).await {
            Some(surface) => {
                debug!(surface = %surface.id, url = %surface.url, "Opened new surface");
                ClickOutcome::Opened { surface }
            }
            None => {
                warn!(url = %self.root, "Host could not open a surface");
                ClickOutcome::Unavailable
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records everything shown and closed.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub shown: Mutex<Vec<Notification>>,
        pub closed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn show(&self, notification: &Notification) {
            self.shown
                .lock()
                .expect("shown lock")
                .push(notification.clone());
        }

        async fn close(&self, tag: &str) {
            self.closed.lock().expect("closed lock").push(tag.to_string());
        }
    }

    /// In-memory window list that records focus and open calls.
    #[derive(Default)]
    pub(crate) struct RecordingSurfaces {
        pub open: Mutex<Vec<ClientSurface>>,
        pub focused: Mutex<Vec<String>>,
        pub opened: Mutex<Vec<String>>,
    }

    impl RecordingSurfaces {
        pub(crate) fn with_surface(id: &str, url: &str) -> Self {
            let surfaces = Self::default();
            surfaces.open.lock().expect("open lock").push(ClientSurface {
                id: id.to_string(),
                url: url.to_string(),
            });
            surfaces
        }
    }

    #[async_trait]
    impl ClientSurfaces for RecordingSurfaces {
        async fn match_all(&self) -> Vec<ClientSurface> {
            self.open.lock().expect("open lock").clone()
        }

        async fn focus(&self, id: &str) -> bool {
            self.focused.lock().expect("focused lock").push(id.to_string());
            true
        }

        async fn open_window(&self, url: &Url) -> Option<ClientSurface> {
            self.opened
                .lock()
                .expect("opened lock")
                .push(url.to_string());
            Some(ClientSurface {
                id: "new".to_string(),
                url: url.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingNotifier, RecordingSurfaces};
    use super::*;

    fn dispatcher(
        notifier: Arc<RecordingNotifier>,
        surfaces: Arc<RecordingSurfaces>,
    ) -> NotificationDispatcher {
        let scope = Url::parse("http://127.0.0.1:5000/").expect("scope");
        NotificationDispatcher::new(
            NotificationDefaults::default(),
            scope.clone(),
            scope,
            notifier,
            surfaces,
        )
    }

    #[tokio::test]
    async fn test_push_merges_over_defaults() {
        let notifier = Arc::new(RecordingNotifier::default());
        let d = dispatcher(notifier.clone(), Arc::default());

        let (payload, err) = NotificationDispatcher::decode(Some(br#"{"title":"T","body":"B"}"#));
        assert!(err.is_none());
        let shown = d.show(payload).await;

        assert_eq!(shown.title, "T");
        assert_eq!(shown.body, "B");
        assert!(shown.require_interaction);
        assert_eq!(shown.icon, "/static/icon-192.png");
        assert_eq!(shown.badge, "/static/icon-192.png");
        assert_eq!(shown.tag, "moneyplan01-notification");
        assert_eq!(shown.vibrate, vec![200, 100, 200]);
        assert_eq!(shown.data, serde_json::json!({}));
        let actions: Vec<&str> = shown.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["open", "close"]);
        assert_eq!(notifier.shown.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_push_shows_raw_text() {
        let d = dispatcher(Arc::default(), Arc::default());

        let (payload, err) = NotificationDispatcher::decode(Some(b"Samsung hit target price"));
        assert!(matches!(err, Some(WorkerError::Decode { .. })));
        let shown = d.show(payload).await;

        assert_eq!(shown.title, "MoneyPlan01");
        assert_eq!(shown.body, "Samsung hit target price");
    }

    #[tokio::test]
    async fn test_push_with_mistyped_field_keeps_title_and_body() {
        let d = dispatcher(Arc::default(), Arc::default());

        let (payload, err) =
            NotificationDispatcher::decode(Some(br#"{"title":"Alert","body":"Price up","tag":5}"#));
        assert!(err.is_none());
        let shown = d.show(payload).await;

        assert_eq!(shown.title, "Alert");
        assert_eq!(shown.body, "Price up");
        assert_eq!(shown.tag, "moneyplan01-notification");
    }

    #[tokio::test]
    async fn test_empty_push_uses_all_defaults() {
        let d = dispatcher(Arc::default(), Arc::default());
        let (payload, err) = NotificationDispatcher::decode(None);
        assert!(err.is_none());
        let shown = d.show(payload).await;
        assert_eq!(shown.body, "You have a new notification");
    }

    #[tokio::test]
    async fn test_close_action_only_dismisses() {
        let notifier = Arc::new(RecordingNotifier::default());
        let surfaces = Arc::new(RecordingSurfaces::with_surface("w1", "http://127.0.0.1:5000/"));
        let d = dispatcher(notifier.clone(), surfaces.clone());

        let outcome = d.click("moneyplan01-notification", Some("close")).await;

        assert_eq!(outcome, ClickOutcome::Dismissed);
        assert_eq!(notifier.closed.lock().expect("lock").len(), 1);
        assert!(surfaces.focused.lock().expect("lock").is_empty());
        assert!(surfaces.opened.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_click_focuses_surface_at_scope() {
        let surfaces = Arc::new(RecordingSurfaces::with_surface("w1", "http://127.0.0.1:5000/"));
        let d = dispatcher(Arc::default(), surfaces.clone());

        let outcome = d.click("moneyplan01-notification", Some("open")).await;

        assert!(matches!(outcome, ClickOutcome::Focused { ref surface } if surface.id == "w1"));
        assert_eq!(*surfaces.focused.lock().expect("lock"), vec!["w1".to_string()]);
        assert!(surfaces.opened.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_click_without_match_opens_exactly_one() {
        let surfaces = Arc::new(RecordingSurfaces::with_surface(
            "w1",
            "http://127.0.0.1:5000/reports",
        ));
        let d = dispatcher(Arc::default(), surfaces.clone());

        let outcome = d.click("moneyplan01-notification", None).await;

        assert!(matches!(outcome, ClickOutcome::Opened { .. }));
        assert!(surfaces.focused.lock().expect("lock").is_empty());
        assert_eq!(
            *surfaces.opened.lock().expect("lock"),
            vec!["http://127.0.0.1:5000/".to_string()]
        );
    }
}
