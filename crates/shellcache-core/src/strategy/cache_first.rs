//! Cache-first strategy for the app shell and static assets.
//!
//! 1. Exact-key hit in the current generation is returned as-is.
//! 2. On a miss the network is tried; an eligible response is copied into
//!    the generation in the background and returned without waiting.
//! 3. If the network fails, the app-shell fallback entry is served when the
//!    generation has it. Otherwise there is nothing to serve.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::http::{Fetcher, Request, RequestKey};
use crate::store::Generation;

use super::{RouteSource, RoutedResponse};

pub async fn fetch(
    request: &Request,
    generation: Arc<Generation>,
    fetcher: &dyn Fetcher,
    fallback: &RequestKey,
) -> Option<RoutedResponse> {
    let key = request.key();

    if let Some(stored) = generation.get(&key) {
        debug!(request = %request, age = %stored.age_display(), "Cache hit");
        return Some(RoutedResponse::new(
            stored.response().clone(),
            RouteSource::Cache,
        ));
    }

    match fetcher.fetch(request).await {
        Ok(response) => {
            let routed = RoutedResponse::new(response, RouteSource::Network);
            if !request.is_get() || !routed.response.is_cacheable() {
                debug!(
                    request = %request,
                    status = routed.response.status,
                    response_type = ?routed.response.response_type,
                    "Response not stored"
                );
                return Some(routed);
            }

            // Persisting may touch disk, keep it off the async workers
            let copy = routed.response.clone();
            let refill = tokio::task::spawn_blocking(move || {
                if let Err(e) = generation.put(key, copy) {
                    warn!(generation = generation.name(), error = %e, "Failed to store response");
                }
            });
            Some(routed.with_refill(refill))
        }
        Err(e) => {
            debug!(request = %request, error = %e, "Network failed, trying app shell fallback");
            generation.get(fallback).map(|stored| {
                RoutedResponse::new(stored.response().clone(), RouteSource::Fallback)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::{ok, request, MockFetcher};
    use crate::http::{Response, ResponseType};
    use crate::store::VersionedStore;

    fn fallback() -> RequestKey {
        request("/").key()
    }

    #[tokio::test]
    async fn test_hit_skips_network() {
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        generation
            .put(request("/static/app.js").key(), ok("cached js"))
            .expect("put");
        let fetcher = MockFetcher::new();
        fetcher.ok("/static/app.js", "fresh js");

        let routed = fetch(&request("/static/app.js"), generation, &fetcher, &fallback())
            .await
            .expect("hit");

        assert_eq!(routed.source, RouteSource::Cache);
        assert_eq!(routed.response.text(), "cached js");
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_refills() {
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        let fetcher = MockFetcher::new();
        fetcher.ok("/static/app.js", "fresh js");

        let mut routed = fetch(
            &request("/static/app.js"),
            generation.clone(),
            &fetcher,
            &fallback(),
        )
        .await
        .expect("network");
        assert_eq!(routed.source, RouteSource::Network);
        assert!(routed.has_refill());
        routed.refilled().await;

        let stored = generation
            .get(&request("/static/app.js").key())
            .expect("refilled");
        assert_eq!(stored.response().text(), "fresh js");
    }

    #[tokio::test]
    async fn test_ineligible_response_returned_but_not_stored() {
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        let fetcher = MockFetcher::new();
        fetcher.respond(
            "https://cdn.example.com/lib.js",
            Response::new(200, ResponseType::Opaque),
        );

        let routed = fetch(&request("/missing.css"), generation.clone(), &fetcher, &fallback())
            .await
            .expect("network answer");
        assert_eq!(routed.response.status, 404);
        assert!(!routed.has_refill());

        let routed = fetch(
            &request("https://cdn.example.com/lib.js"),
            generation.clone(),
            &fetcher,
            &fallback(),
        )
        .await
        .expect("network answer");
        assert_eq!(routed.response.response_type, ResponseType::Opaque);
        assert!(!routed.has_refill());
        assert!(generation.is_empty());
    }

    #[tokio::test]
    async fn test_offline_serves_app_shell() {
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        generation
            .put(fallback(), ok("<html>shell</html>"))
            .expect("put");
        let fetcher = MockFetcher::new();
        fetcher.set_offline(true);

        let routed = fetch(&request("/reports/2024"), generation, &fetcher, &fallback())
            .await
            .expect("fallback");
        assert_eq!(routed.source, RouteSource::Fallback);
        assert_eq!(routed.response.text(), "<html>shell</html>");
    }

    #[tokio::test]
    async fn test_offline_without_shell_is_none() {
        let store = VersionedStore::in_memory();
        let generation = store.open("app-v1");
        let fetcher = MockFetcher::new();
        fetcher.set_offline(true);

        let routed = fetch(&request("/reports/2024"), generation, &fetcher, &fallback()).await;
        assert!(routed.is_none());
    }
}
