use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::StoreError;

/// How much of a response the client is allowed to inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Same-origin response
    Basic,
    /// Cross-origin response with CORS headers
    Cors,
    /// Cross-origin response whose status and body cannot be trusted
    Opaque,
    /// Built locally rather than received from the network
    Synthesized,
}

/// A complete HTTP response: status, headers and the fully read body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "hex_body")]
    pub body: Vec<u8>,
    pub response_type: ResponseType,
}

impl Response {
    pub fn new(status: u16, response_type: ResponseType) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            response_type,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// A synthesized JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, ResponseType::Synthesized)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// The structured offline envelope returned instead of a transport error.
    pub fn offline(message: &str) -> Self {
        Self::json(
            503,
            &serde_json::json!({
                "error": "offline",
                "offline": true,
                "message": message,
            }),
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only successful same-origin responses may enter the store.
    pub fn check_cacheable(&self) -> Result<(), StoreError> {
        if !self.is_success() {
            return Err(StoreError::Ineligible(format!("status {}", self.status)));
        }
        if self.response_type != ResponseType::Basic {
            return Err(StoreError::Ineligible(format!(
                "{:?} response",
                self.response_type
            )));
        }
        Ok(())
    }

    pub fn is_cacheable(&self) -> bool {
        self.check_cacheable().is_ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json_body<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Bodies are persisted as hex so binary assets survive the JSON round trip.
mod hex_body {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        hex::decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_envelope_is_json() {
        let response = Response::offline("origin unreachable");
        assert_eq!(response.status, 503);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        let body: serde_json::Value = response.json_body().expect("valid json");
        assert_eq!(body["offline"], true);
        assert_eq!(body["error"], "offline");
    }

    #[test]
    fn test_cacheable_requires_success_and_basic() {
        assert!(Response::new(200, ResponseType::Basic).is_cacheable());
        assert!(Response::new(204, ResponseType::Basic).is_cacheable());
        assert!(!Response::new(404, ResponseType::Basic).is_cacheable());
        assert!(!Response::new(500, ResponseType::Basic).is_cacheable());
        assert!(!Response::new(200, ResponseType::Opaque).is_cacheable());
        assert!(!Response::new(200, ResponseType::Cors).is_cacheable());
        assert!(!Response::offline("x").is_cacheable());
    }

    #[test]
    fn test_binary_body_survives_serialization() {
        let response = Response::new(200, ResponseType::Basic).with_body(vec![0u8, 159, 146, 150]);
        let encoded = serde_json::to_string(&response).expect("serialize");
        let decoded: Response = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, response);
    }
}
