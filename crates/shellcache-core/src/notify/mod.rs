//! Push notifications.
//!
//! A push message is decoded into a [`NotificationPayload`], merged over the
//! configured defaults into a [`Notification`] and handed to the host's
//! [`Notifier`]. Clicks are routed back to an existing client surface or a
//! new one.

pub mod dispatcher;
pub mod payload;

pub use dispatcher::{
    ClickOutcome, ClientSurface, ClientSurfaces, Notification, NotificationDispatcher, Notifier,
};
pub use payload::{NotificationAction, NotificationPayload};
