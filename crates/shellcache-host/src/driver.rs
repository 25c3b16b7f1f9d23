//! JSON-lines event driver.
//!
//! Reads one host event per line, hands it to the worker, waits for the
//! handler and writes one JSON result line back. A malformed line produces
//! an error line and the driver keeps going.

use std::fmt::Display;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use shellcache_core::{ControlMessage, HostEvent, Request, Worker};

use crate::surfaces::SurfaceRegistry;

fn default_method() -> String {
    "GET".to_string()
}

/// One line of driver input.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum HostCommand {
    Install,
    Activate,
    Fetch {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    Push {
        /// A string is delivered as raw bytes, anything else as JSON
        #[serde(default)]
        data: Option<Value>,
    },
    NotificationClick {
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        action: Option<String>,
    },
    Sync {
        tag: String,
    },
    RegisterSync {
        tag: String,
    },
    Message {
        #[serde(default)]
        data: Value,
    },
    SurfaceOpen {
        url: String,
    },
    Status,
}

fn push_bytes(data: Option<Value>) -> Option<Vec<u8>> {
    match data {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.into_bytes()),
        Some(other) => Some(other.to_string().into_bytes()),
    }
}

fn success(event: &str, result: Value) -> Value {
    json!({ "event": event, "ok": true, "result": result })
}

fn failure(event: &str, error: impl Display) -> Value {
    json!({ "event": event, "ok": false, "error": error.to_string() })
}

pub struct Driver {
    worker: Worker,
    surfaces: Arc<SurfaceRegistry>,
}

impl Driver {
    pub fn new(worker: Worker, surfaces: Arc<SurfaceRegistry>) -> Self {
        Self { worker, surfaces }
    }

    /// Process lines until `input` ends. Returns how many events were handled.
    pub async fn run<R, W>(&self, input: R, mut output: W) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut handled = 0;

        while let Some(line) = lines.next_line().await.context("Failed to read host event")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let result = match serde_json::from_str::<HostCommand>(line) {
                Ok(command) => {
                    debug!(?command, "Host event");
                    self.execute(command).await
                }
                Err(e) => {
                    warn!(error = %e, "Malformed host event");
                    failure("invalid", format!("Malformed host event: {}", e))
                }
            };

            let mut encoded = serde_json::to_vec(&result)?;
            encoded.push(b'\n');
            output
                .write_all(&encoded)
                .await
                .context("Failed to write result")?;
            output.flush().await?;
            handled += 1;
        }

        debug!(handled, "Host event stream ended");
        Ok(handled)
    }

    pub async fn execute(&self, command: HostCommand) -> Value {
        match command {
            HostCommand::Install => self.dispatch(HostEvent::Install).await,
            HostCommand::Activate => self.dispatch(HostEvent::Activate).await,
            HostCommand::Fetch { url, method } => self.fetch(&url, &method).await,
            HostCommand::Push { data } => {
                self.dispatch(HostEvent::Push {
                    data: push_bytes(data),
                })
                .await
            }
            HostCommand::NotificationClick { tag, action } => {
                let tag = tag.unwrap_or_else(|| self.worker.config().notifications.tag.clone());
                self.dispatch(HostEvent::NotificationClick { tag, action })
                    .await
            }
            HostCommand::Sync { tag } => self.dispatch(HostEvent::Sync { tag }).await,
            HostCommand::RegisterSync { tag } => {
                let registered = self.worker.sync_queue().register(&tag);
                success(
                    "register-sync",
                    json!({ "registered": registered, "tags": self.worker.sync_queue().tags() }),
                )
            }
            HostCommand::Message { data } => self.message(data).await,
            HostCommand::SurfaceOpen { url } => {
                let surface = self.surfaces.attach(&url);
                success("surface-open", json!({ "id": surface.id, "url": surface.url }))
            }
            HostCommand::Status => success("status", self.status()),
        }
    }

    async fn dispatch(&self, event: HostEvent) -> Value {
        let kind = event.kind();
        match self.worker.handle(event).wait().await {
            Ok(outcome) => success(
                kind.as_str(),
                serde_json::to_value(&outcome).unwrap_or_default(),
            ),
            Err(e) => failure(kind.as_str(), e),
        }
    }

    async fn fetch(&self, url: &str, method: &str) -> Value {
        let resolved = self
            .worker
            .config()
            .origin_url()
            .and_then(|origin| origin.join(url).context("Invalid fetch URL"));
        let request = match resolved {
            Ok(resolved) => Request::new(method, resolved),
            Err(e) => return failure("fetch", format!("{:#}", e)),
        };

        let (event, response) = HostEvent::fetch(request);
        if let Err(e) = self.worker.handle(event).wait().await {
            return failure("fetch", e);
        }

        match response.await {
            Ok(routed) => success(
                "fetch",
                json!({
                    "source": routed.source,
                    "status": routed.response.status,
                    "content_type": routed.response.header("content-type"),
                    "body": routed.response.text(),
                }),
            ),
            Err(_) => failure("fetch", "Worker dropped the response"),
        }
    }

    async fn message(&self, data: Value) -> Value {
        let message = ControlMessage::parse(data.to_string().as_bytes());
        let (reply_tx, reply_rx) = oneshot::channel();
        let outcome = self
            .dispatch(HostEvent::Message {
                message,
                reply: Some(reply_tx),
            })
            .await;

        // Only purge-all replies; the channel is simply dropped otherwise
        if let Ok(reply) = reply_rx.await {
            debug!(success = reply.success, "Control reply");
        }
        outcome
    }

    fn status(&self) -> Value {
        let store = self.worker.store();
        let generations: Vec<Value> = store
            .generation_names()
            .into_iter()
            .filter_map(|name| store.generation(&name))
            .map(|generation| {
                json!({
                    "name": generation.name(),
                    "entries": generation.len(),
                    "last_stored_at": generation.last_stored_at(),
                })
            })
            .collect();

        json!({
            "state": self.worker.state(),
            "current": self.worker.cache_name(),
            "generations": generations,
            "sync_tags": self.worker.sync_queue().tags(),
            "surface_ops": self.surfaces.ops(),
        })
    }
}
