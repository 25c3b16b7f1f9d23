use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::FetchError;

/// An intercepted outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    url: Url,
}

impl Request {
    pub fn new(method: &str, mut url: Url) -> Self {
        // Fragments never reach the server and must not split cache keys
        url.set_fragment(None);
        Self {
            method: method.to_ascii_uppercase(),
            url,
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    /// Resolve an origin-relative path (or absolute URL) into a GET request.
    pub fn resolve(origin: &Url, path: &str) -> Result<Self, FetchError> {
        let url = origin
            .join(path)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", path, e)))?;
        Ok(Self::get(url))
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Only GET requests are ever matched against or written to the store.
    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn is_same_origin(&self, origin: &Url) -> bool {
        self.url.origin() == origin.origin()
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Deterministic store key for a request.
///
/// The digest is the SHA-256 of `METHOD url`; the readable form is kept
/// next to it for logs and status output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    digest: String,
    description: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        let description = format!("{} {}", method.to_ascii_uppercase(), url);

        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(description.as_bytes());
        let digest = hex::encode(hasher.finalize());

        Self {
            digest,
            description,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
