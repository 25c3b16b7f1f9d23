//! Scripted network used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use url::Url;

use crate::config::WorkerConfig;
use crate::error::FetchError;

use super::{Fetcher, Request, Response, ResponseType};

pub(crate) const TEST_ORIGIN: &str = "http://127.0.0.1:5000/";

pub(crate) fn test_config() -> WorkerConfig {
    WorkerConfig {
        origin: TEST_ORIGIN.to_string(),
        ..WorkerConfig::default()
    }
}

pub(crate) fn url(path: &str) -> String {
    Url::parse(TEST_ORIGIN)
        .and_then(|origin| origin.join(path))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| path.to_string())
}

pub(crate) fn request(path: &str) -> Request {
    let origin = Url::parse(TEST_ORIGIN).expect("test origin");
    Request::resolve(&origin, path).expect("test request")
}

pub(crate) fn ok(body: &str) -> Response {
    Response::new(200, ResponseType::Basic)
        .with_header("content-type", "text/html")
        .with_body(body)
}

/// Routes are keyed by absolute URL. Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct MockFetcher {
    routes: Mutex<HashMap<String, Response>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Script a response for `path`, clearing any scripted failure.
    pub(crate) fn respond(&self, path: &str, response: Response) {
        let target = url(path);
        self.failing.lock().expect("failing lock").remove(&target);
        self.routes
            .lock()
            .expect("routes lock")
            .insert(target, response);
    }

    pub(crate) fn ok(&self, path: &str, body: &str) {
        self.respond(path, ok(body));
    }

    /// Make one URL fail at the transport level.
    pub(crate) fn fail(&self, path: &str) {
        self.failing.lock().expect("failing lock").insert(url(path));
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        let target = url(path);
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|c| **c == target)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let target = request.url().to_string();
        self.calls.lock().expect("calls lock").push(target.clone());

        if self.offline.load(Ordering::SeqCst)
            || self.failing.lock().expect("failing lock").contains(&target)
        {
            return Err(FetchError::Unreachable(target));
        }

        Ok(self
            .routes
            .lock()
            .expect("routes lock")
            .get(&target)
            .cloned()
            .unwrap_or_else(|| Response::new(404, ResponseType::Basic).with_body("Not Found")))
    }
}
