//! Network-only strategy for live data.

use tracing::warn;

use crate::http::{Fetcher, Request};

use super::{RouteSource, RoutedResponse};

/// Fetch `request` from the network.
///
/// Whatever the origin answers is returned unmodified, error statuses
/// included. A transport failure becomes the offline envelope so the client
/// always receives parseable JSON instead of a rejected promise.
pub async fn fetch(request: &Request, fetcher: &dyn Fetcher) -> RoutedResponse {
    match fetcher.fetch(request).await {
        Ok(response) => RoutedResponse::new(response, RouteSource::Network),
        Err(e) => {
            warn!(request = %request, error = %e, "Network unavailable for live request");
            RoutedResponse::offline("Network unavailable. Showing offline data.")
        }
    }
}
