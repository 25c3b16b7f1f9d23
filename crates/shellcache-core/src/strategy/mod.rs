//! Request routing and the two fetch strategies.
//!
//! Every intercepted request is classified by path: API calls always go to
//! the network, everything else is served cache-first. The router spawns
//! the chosen strategy and hands back a [`ResponseFuture`] right away.

pub mod cache_first;
pub mod network_only;
pub mod router;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::http::Response;

pub use router::{ResponseFuture, RouterState, StrategyRouter};

/// Which strategy a request is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    NetworkOnly,
    CacheFirst,
}

/// Classify a request path. Any path containing the API prefix is live data.
pub fn classify(path: &str, api_prefix: &str) -> Route {
    if path.contains(api_prefix) {
        Route::NetworkOnly
    } else {
        Route::CacheFirst
    }
}

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    /// Fresh from the origin
    Network,
    /// Exact hit in the current generation
    Cache,
    /// App-shell entry served because the network failed
    Fallback,
    /// Synthesized offline envelope
    Offline,
}

/// Terminal result of routing one request.
#[derive(Debug)]
pub struct RoutedResponse {
    pub response: Response,
    pub source: RouteSource,
    /// Background store write started by a cache-first network hit
    refill: Option<JoinHandle<()>>,
}

impl RoutedResponse {
    pub fn new(response: Response, source: RouteSource) -> Self {
        Self {
            response,
            source,
            refill: None,
        }
    }

    pub fn offline(message: &str) -> Self {
        Self::new(Response::offline(message), RouteSource::Offline)
    }

    pub(crate) fn with_refill(mut self, refill: JoinHandle<()>) -> Self {
        self.refill = Some(refill);
        self
    }

    pub fn is_offline(&self) -> bool {
        self.source == RouteSource::Offline
    }

    /// Detach the background store write so its owner can await it.
    pub(crate) fn take_refill(&mut self) -> Option<JoinHandle<()>> {
        self.refill.take()
    }

    pub fn has_refill(&self) -> bool {
        self.refill.is_some()
    }

    /// Wait for the background store write, if one was started.
    ///
    /// Responses are returned before their copy is stored; callers that need
    /// the store to reflect the response (status output, tests) await this.
    pub async fn refilled(&mut self) {
        await_refill(self.refill.take()).await;
    }

    /// Drop the refill handle and keep only the response.
    ///
    /// The write carries on in the background.
    pub fn into_response(self) -> Response {
        self.response
    }
}

pub(crate) async fn await_refill(refill: Option<JoinHandle<()>>) {
    if let Some(handle) = refill {
        if let Err(e) = handle.await {
            warn!(error = %e, "Store refill task did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_paths_are_network_only() {
        assert_eq!(classify("/api/portfolio", "/api/"), Route::NetworkOnly);
        assert_eq!(classify("/v2/api/quotes", "/api/"), Route::NetworkOnly);
        assert_eq!(classify("/", "/api/"), Route::CacheFirst);
        assert_eq!(classify("/static/app.js", "/api/"), Route::CacheFirst);
        // No trailing slash, so not the API prefix
        assert_eq!(classify("/api", "/api/"), Route::CacheFirst);
    }

    #[test]
    fn test_offline_routed_response() {
        let routed = RoutedResponse::offline("no network");
        assert!(routed.is_offline());
        assert!(!routed.has_refill());
        assert_eq!(routed.into_response().status, 503);
    }
}
