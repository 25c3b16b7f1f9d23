//! Network access for the worker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use tracing::debug;
use url::Url;

use crate::config::WorkerConfig;
use crate::error::FetchError;

use super::{Request, Response, ResponseType};

/// Anything that can take a request to the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// reqwest-backed fetcher.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: Url, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, origin })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self, FetchError> {
        let origin = Url::parse(&config.origin)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {}", config.origin, e)))?;
        Self::new(origin, Duration::from_secs(config.request_timeout_secs))
    }

    /// Same-origin responses are basic; cross-origin ones are only readable
    /// when the server opted in with CORS headers.
    fn response_type(&self, url: &Url, headers: &header::HeaderMap) -> ResponseType {
        if url.origin() == self.origin.origin() {
            ResponseType::Basic
        } else if headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN) {
            ResponseType::Cors
        } else {
            ResponseType::Opaque
        }
    }
}

fn transport_error(request: &Request, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(request.url().to_string())
    } else if err.is_connect() {
        FetchError::Unreachable(format!("{}: {}", request.url(), err))
    } else {
        FetchError::Network(err)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|_| FetchError::InvalidRequest(format!("method {}", request.method())))?;

        let response = self
            .client
            .request(method, request.url().clone())
            .send()
            .await
            .map_err(|e| transport_error(request, e))?;

        let status = response.status().as_u16();
        let response_type = self.response_type(response.url(), response.headers());
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(request, e))?
            .to_vec();

        debug!(request = %request, status, ?response_type, bytes = body.len(), "Fetched");

        Ok(Response {
            status,
            headers,
            body,
            response_type,
        })
    }
}
