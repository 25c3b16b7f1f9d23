//! Control messages from the foreground client.
//!
//! Wire format: `{"action": "force-activate"}` or `{"action": "purge-all"}`.
//! The older `skipWaiting` and `clearCache` spellings are accepted. Anything
//! else, malformed JSON included, is ignored.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::worker::HostEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "action")]
pub enum ControlMessage {
    /// Let the installed generation take over without waiting for clients
    #[serde(rename = "force-activate", alias = "skipWaiting")]
    ForceActivate,
    /// Delete every generation
    #[serde(rename = "purge-all", alias = "clearCache")]
    PurgeAll,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Decode a message. Never fails: undecodable input is `Unknown`.
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable control message");
                ControlMessage::Unknown
            }
        }
    }
}

/// Reply posted back on the message's reply channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ControlReply {
    pub success: bool,
}

/// Foreground-side handle for sending control messages to a running worker.
#[derive(Clone)]
pub struct ControlClient {
    events: mpsc::Sender<HostEvent>,
}

impl ControlClient {
    pub fn new(events: mpsc::Sender<HostEvent>) -> Self {
        Self { events }
    }

    /// Ask the worker to activate now. Fire and forget.
    pub async fn force_activate(&self) -> bool {
        self.send(ControlMessage::ForceActivate, None).await
    }

    /// Ask the worker to delete every generation and wait for its reply.
    ///
    /// Returns `None` if the worker is gone or dropped the reply channel.
    pub async fn purge_all(&self) -> Option<ControlReply> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ControlMessage::PurgeAll, Some(tx)).await {
            return None;
        }
        rx.await.ok()
    }

    async fn send(
        &self,
        message: ControlMessage,
        reply: Option<oneshot::Sender<ControlReply>>,
    ) -> bool {
        let event = HostEvent::Message { message, reply };
        if let Err(e) = self.events.send(event).await {
            warn!(?message, error = %e, "Failed to send control message - worker stopped");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_current_and_legacy_spellings() {
        assert_eq!(
            ControlMessage::parse(br#"{"action":"force-activate"}"#),
            ControlMessage::ForceActivate
        );
        assert_eq!(
            ControlMessage::parse(br#"{"action":"skipWaiting"}"#),
            ControlMessage::ForceActivate
        );
        assert_eq!(
            ControlMessage::parse(br#"{"action":"purge-all"}"#),
            ControlMessage::PurgeAll
        );
        assert_eq!(
            ControlMessage::parse(br#"{"action":"clearCache","extra":1}"#),
            ControlMessage::PurgeAll
        );
    }

    #[test]
    fn test_anything_else_is_unknown() {
        assert_eq!(
            ControlMessage::parse(br#"{"action":"reboot"}"#),
            ControlMessage::Unknown
        );
        assert_eq!(ControlMessage::parse(br#"{"cmd":"purge-all"}"#), ControlMessage::Unknown);
        assert_eq!(ControlMessage::parse(b"purge-all"), ControlMessage::Unknown);
        assert_eq!(ControlMessage::parse(b""), ControlMessage::Unknown);
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = ControlReply { success: true };
        assert_eq!(
            serde_json::to_string(&reply).expect("serialize"),
            r#"{"success":true}"#
        );
    }

    #[tokio::test]
    async fn test_client_reports_stopped_worker() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let client = ControlClient::new(tx);
        assert!(!client.force_activate().await);
        assert!(client.purge_all().await.is_none());
    }
}
