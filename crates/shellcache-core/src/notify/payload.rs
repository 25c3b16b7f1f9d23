use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkerError;

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl NotificationAction {
    pub fn new(action: &str, title: &str) -> Self {
        Self {
            action: action.to_string(),
            title: title.to_string(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.to_string());
        self
    }
}

/// Decoded push message. Every field is optional; missing ones are filled
/// from the configured defaults when the notification is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NotificationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Opaque application data handed back on click
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "ts", ts(type = "unknown"))]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<NotificationAction>>,
}

impl NotificationPayload {
    /// Parse a push message as a JSON object.
    ///
    /// Only a payload that is not a JSON object fails. Inside the object,
    /// fields of the wrong type are skipped and left to the defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, WorkerError> {
        let decode_error = |reason: String| WorkerError::Decode {
            what: "push payload",
            reason,
        };
        let value: Value = serde_json::from_slice(bytes).map_err(|e| decode_error(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(decode_error("expected a JSON object".to_string()));
        };

        Ok(Self {
            title: string_field(&fields, "title"),
            body: string_field(&fields, "body"),
            icon: string_field(&fields, "icon"),
            badge: string_field(&fields, "badge"),
            tag: string_field(&fields, "tag"),
            data: fields.get("data").filter(|v| !v.is_null()).cloned(),
            actions: fields.get("actions").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(|item| NotificationAction::deserialize(item).ok())
                    .collect()
            }),
        })
    }

    /// Treat a push message as plain text: it becomes the body.
    pub fn from_text(bytes: &[u8]) -> Self {
        Self {
            body: Some(String::from_utf8_lossy(bytes).into_owned()),
            ..Self::default()
        }
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_string)
}
