use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error};

use crate::config::WorkerConfig;
use crate::error::FetchError;
use crate::http::{Fetcher, Request, RequestKey};
use crate::store::Generation;

use super::{cache_first, classify, network_only, Route, RoutedResponse};

/// Progress of one routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    Classifying,
    Dispatched,
    Resolved,
}

/// Classifies intercepted requests and dispatches them to a strategy.
#[derive(Clone)]
pub struct StrategyRouter {
    api_prefix: String,
    fallback: RequestKey,
    fetcher: Arc<dyn Fetcher>,
}

impl StrategyRouter {
    pub fn new(config: &WorkerConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, FetchError> {
        let fallback = config.request(&config.fallback_key)?.key();
        Ok(Self {
            api_prefix: config.api_prefix.clone(),
            fallback,
            fetcher,
        })
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn classify(&self, request: &Request) -> Route {
        if !request.is_get() {
            return Route::NetworkOnly;
        }
        classify(request.path(), &self.api_prefix)
    }

    /// Dispatch `request` and return its in-flight handle immediately.
    ///
    /// Without a generation (worker not active) every request is treated as
    /// network-only so nothing is ever served from a stale store. Non-GET
    /// requests are always network-only.
    pub fn route(&self, request: Request, generation: Option<Arc<Generation>>) -> ResponseFuture {
        let mut future = ResponseFuture {
            state: RouterState::Idle,
            route: Route::NetworkOnly,
            handle: None,
        };

        future.state = RouterState::Classifying;
        let route = if generation.is_some() {
            self.classify(&request)
        } else {
            Route::NetworkOnly
        };
        debug!(request = %request, ?route, "Routing request");

        let fetcher = Arc::clone(&self.fetcher);
        let handle = match (route, generation) {
            (Route::CacheFirst, Some(generation)) => {
                let fallback = self.fallback.clone();
                tokio::spawn(async move {
                    cache_first::fetch(&request, generation, fetcher.as_ref(), &fallback).await
                })
            }
            _ => tokio::spawn(async move {
                Some(network_only::fetch(&request, fetcher.as_ref()).await)
            }),
        };

        future.route = route;
        future.handle = Some(handle);
        future.state = RouterState::Dispatched;
        future
    }
}

/// In-flight routed request.
///
/// Resolves exactly once. A strategy that found nothing to serve, and a
/// strategy task that panicked, both resolve to the offline envelope.
pub struct ResponseFuture {
    state: RouterState,
    route: Route,
    handle: Option<JoinHandle<Option<RoutedResponse>>>,
}

impl ResponseFuture {
    pub fn state(&self) -> RouterState {
        self.state
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

fn settle(route: Route, result: Result<Option<RoutedResponse>, JoinError>) -> RoutedResponse {
    match result {
        Ok(Some(routed)) => routed,
        Ok(None) => {
            debug!(?route, "Nothing to serve, answering offline");
            RoutedResponse::offline("Offline and not cached.")
        }
        Err(e) => {
            error!(?route, error = %e, "Strategy task failed");
            RoutedResponse::offline("Request could not be completed.")
        }
    }
}

impl Future for ResponseFuture {
    type Output = RoutedResponse;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(handle) = this.handle.as_mut() else {
            panic!("ResponseFuture polled after completion");
        };

        match Pin::new(handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                this.handle = None;
                this.state = RouterState::Resolved;
                Poll::Ready(settle(this.route, result))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{ok, request, test_config, MockFetcher};
    use crate::store::VersionedStore;
    use crate::strategy::RouteSource;

    fn router(fetcher: Arc<MockFetcher>) -> StrategyRouter {
        StrategyRouter::new(&test_config(), fetcher).expect("router")
    }

    #[tokio::test]
    async fn test_api_request_goes_to_network_even_when_cached() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.ok("/api/portfolio", "live");
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        generation
            .put(request("/api/portfolio").key(), ok("stale"))
            .expect("put");

        let future = router(fetcher.clone()).route(request("/api/portfolio"), Some(generation));
        assert_eq!(future.route(), Route::NetworkOnly);
        assert_eq!(future.state(), RouterState::Dispatched);

        let routed = future.await;
        assert_eq!(routed.source, RouteSource::Network);
        assert_eq!(routed.response.text(), "live");
        assert_eq!(fetcher.calls("/api/portfolio"), 1);
    }

    #[tokio::test]
    async fn test_cached_shell_served_without_network() {
        let fetcher = Arc::new(MockFetcher::new());
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        generation
            .put(request("/").key(), ok("<html>shell</html>"))
            .expect("put");

        let routed = router(fetcher.clone())
            .route(request("/"), Some(generation))
            .await;
        assert_eq!(routed.source, RouteSource::Cache);
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_miss_offline_becomes_offline_response() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.set_offline(true);
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");

        let routed = router(fetcher)
            .route(request("/static/app.js"), Some(generation))
            .await;
        assert!(routed.is_offline());
        assert_eq!(routed.response.status, 503);
    }

    #[tokio::test]
    async fn test_post_never_served_from_store() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.ok("/orders", "created");
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        let router = router(fetcher.clone());
        let post = || Request::new("post", request("/orders").url().clone());

        let future = router.route(post(), Some(Arc::clone(&generation)));
        assert_eq!(future.route(), Route::NetworkOnly);
        let first = future.await;
        assert_eq!(first.source, RouteSource::Network);
        assert!(!first.has_refill());

        let second = router.route(post(), Some(Arc::clone(&generation))).await;
        assert_eq!(second.source, RouteSource::Network);
        assert_eq!(fetcher.calls("/orders"), 2);
        assert!(generation.is_empty());
    }

    #[tokio::test]
    async fn test_without_generation_everything_is_network_only() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.ok("/", "fresh shell");

        let future = router(fetcher.clone()).route(request("/"), None);
        assert_eq!(future.route(), Route::NetworkOnly);
        let routed = future.await;
        assert_eq!(routed.source, RouteSource::Network);
        assert!(!routed.has_refill());
    }
}
