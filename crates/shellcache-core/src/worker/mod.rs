//! The process-wide worker context.
//!
//! A [`Worker`] owns the store, the router, the notification dispatcher and
//! the sync queue, and exposes the lifecycle hooks (`install`, `activate`,
//! `teardown`) plus a dispatch table (`handle`) that turns every
//! [`HostEvent`] into a spawned handler wrapped in a [`WaitUntil`].
//!
//! Every handler failure goes through [`crate::error::settle`]; only a
//! failed install or activation reaches the host as an error.

mod events;
mod lifecycle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, error, info};

use crate::config::WorkerConfig;
use crate::control::{ControlMessage, ControlReply};
use crate::error::{self, WorkerError};
use crate::http::{Fetcher, Request};
use crate::notify::{ClientSurfaces, NotificationDispatcher, Notifier};
use crate::store::{Generation, VersionedStore};
use crate::strategy::{self, RoutedResponse, StrategyRouter};
use crate::sync::{SnapshotConsumer, SyncRetryQueue};

pub use events::{EventKind, EventOutcome, HostEvent, WaitUntil};
pub use lifecycle::WorkerState;

use lifecycle::Lifecycle;

/// Host-provided seams the worker talks through.
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub surfaces: Arc<dyn ClientSurfaces>,
    pub consumer: Arc<dyn SnapshotConsumer>,
}

/// Cheap to clone; clones share one context.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<Inner>,
}

struct Inner {
    config: WorkerConfig,
    cache_name: String,
    seeds: Vec<Request>,
    store: VersionedStore,
    router: StrategyRouter,
    dispatcher: NotificationDispatcher,
    sync: SyncRetryQueue,
    lifecycle: Lifecycle,
    skip_waiting: AtomicBool,
    /// Serializes install and activate
    steps: Mutex<()>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: VersionedStore,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let seeds = config
            .seed_requests()
            .context("Invalid seed key in config")?;
        let snapshot_request = config
            .request(&config.sync_endpoint)
            .context("Invalid sync endpoint in config")?;
        let router = StrategyRouter::new(&config, Arc::clone(&collaborators.fetcher))
            .context("Invalid fallback key in config")?;

        let scope = config.scope_url()?;
        let root = config.origin_url()?.join("/").context("Invalid origin root")?;
        let dispatcher = NotificationDispatcher::new(
            config.notifications.clone(),
            scope,
            root,
            collaborators.notifier,
            collaborators.surfaces,
        );
        let sync = SyncRetryQueue::new(
            &config.sync_tag,
            snapshot_request,
            collaborators.fetcher,
            collaborators.consumer,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                cache_name: config.cache_name(),
                skip_waiting: AtomicBool::new(config.skip_waiting),
                config,
                seeds,
                store,
                router,
                dispatcher,
                sync,
                lifecycle: Lifecycle::new(),
                steps: Mutex::new(()),
            }),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    /// Name of the generation this worker installs and serves.
    pub fn cache_name(&self) -> &str {
        &self.inner.cache_name
    }

    pub fn store(&self) -> &VersionedStore {
        &self.inner.store
    }

    pub fn sync_queue(&self) -> &SyncRetryQueue {
        &self.inner.sync
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lifecycle.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.inner.lifecycle.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the current generation and populate it with the seed keys.
    ///
    /// On failure the worker returns to `Parsed` so install can be retried.
    pub async fn install(&self) -> Result<usize, WorkerError> {
        let _step = self.inner.steps.lock().await;
        self.inner.lifecycle.transition(WorkerState::Installing)?;
        info!(generation = %self.inner.cache_name, seeds = self.inner.seeds.len(), "Installing");

        let generation = self.inner.store.open(&self.inner.cache_name);
        let fetcher = self.inner.router.fetcher();
        match self
            .inner
            .store
            .populate(&generation, &self.inner.seeds, fetcher.as_ref())
            .await
        {
            Ok(stored) => {
                self.inner.lifecycle.transition(WorkerState::Installed)?;
                Ok(stored)
            }
            Err(e) => {
                self.inner.lifecycle.transition(WorkerState::Parsed)?;
                Err(e.into())
            }
        }
    }

    /// Whether an installed worker may activate right away.
    pub fn should_activate(&self) -> bool {
        self.state() == WorkerState::Installed && self.inner.skip_waiting.load(Ordering::SeqCst)
    }

    /// Delete every stale generation, then take control of clients.
    ///
    /// Fetches arriving meanwhile wait until this finishes.
    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        let _step = self.inner.steps.lock().await;
        self.inner.lifecycle.transition(WorkerState::Activating)?;
        info!(generation = %self.inner.cache_name, "Activating");

        let cleanup = self
            .inner
            .store
            .delete_generations_except(&self.inner.cache_name)
            .and_then(|removed| self.inner.store.flush().map(|()| removed));

        match cleanup {
            Ok(removed) => {
                if !removed.is_empty() {
                    info!(removed = ?removed, "Removed stale generations");
                }
                debug!("Claiming clients");
                self.inner.lifecycle.transition(WorkerState::Activated)?;
                Ok(removed)
            }
            Err(e) => {
                self.inner.lifecycle.transition(WorkerState::Installed)?;
                Err(e.into())
            }
        }
    }

    /// Flush the store and retire the worker.
    pub fn teardown(&self) -> Result<(), WorkerError> {
        let flushed = self.inner.store.flush();
        self.inner.lifecycle.transition(WorkerState::Redundant)?;
        info!("Worker retired");
        flushed.map_err(WorkerError::from)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Dispatch an event to its handler and return the handle to wait on.
    pub fn handle(&self, event: HostEvent) -> WaitUntil {
        let kind = event.kind();
        let worker = self.clone();
        let handle = tokio::spawn(async move {
            match worker.dispatch(event).await {
                Ok(outcome) => Ok(outcome),
                Err(e) => error::settle(kind, e),
            }
        });
        WaitUntil::new(kind, handle)
    }

    async fn dispatch(&self, event: HostEvent) -> Result<EventOutcome, WorkerError> {
        match event {
            HostEvent::Install => self
                .install()
                .await
                .map(|stored| EventOutcome::Installed { stored }),
            HostEvent::Activate => self
                .activate()
                .await
                .map(|removed| EventOutcome::Activated { removed }),
            HostEvent::Fetch {
                request,
                respond_to,
            } => Ok(self.on_fetch(request, respond_to).await),
            HostEvent::Push { data } => {
                let (payload, decode_error) = NotificationDispatcher::decode(data.as_deref());
                let notification = self.inner.dispatcher.show(payload).await;
                match decode_error {
                    // Shown as text; still reported as a decode failure
                    Some(e) => Err(e),
                    None => Ok(EventOutcome::Shown(notification)),
                }
            }
            HostEvent::NotificationClick { tag, action } => Ok(EventOutcome::Clicked(
                self.inner.dispatcher.click(&tag, action.as_deref()).await,
            )),
            HostEvent::Sync { tag } => self.inner.sync.on_sync(&tag).await.map(EventOutcome::Synced),
            HostEvent::Message { message, reply } => self.on_message(message, reply).await,
        }
    }

    /// Route one request.
    ///
    /// Only an activated worker consults the store; before that, and after
    /// teardown, every request goes straight to the network.
    pub async fn fetch(&self, request: Request) -> RoutedResponse {
        let generation = self.serving_generation().await;
        self.inner.router.route(request, generation).await
    }

    async fn serving_generation(&self) -> Option<Arc<Generation>> {
        let state = self.inner.lifecycle.settled().await;
        if state.is_active() {
            Some(self.inner.store.open(&self.inner.cache_name))
        } else {
            None
        }
    }

    async fn on_fetch(
        &self,
        request: Request,
        respond_to: oneshot::Sender<RoutedResponse>,
    ) -> EventOutcome {
        let mut routed = self.fetch(request).await;
        let refill = routed.take_refill();
        let outcome = EventOutcome::Fetched {
            source: routed.source,
            status: routed.response.status,
        };
        if respond_to.send(routed).is_err() {
            debug!("Fetch requester went away before the response was ready");
        }
        // The requester already has its response; the store write still
        // belongs to this handler
        strategy::await_refill(refill).await;
        outcome
    }

    async fn on_message(
        &self,
        message: ControlMessage,
        reply: Option<oneshot::Sender<ControlReply>>,
    ) -> Result<EventOutcome, WorkerError> {
        match message {
            ControlMessage::ForceActivate => {
                self.inner.skip_waiting.store(true, Ordering::SeqCst);
                info!("Force activation requested");
                if self.should_activate() {
                    self.activate().await?;
                }
                Ok(EventOutcome::Controlled {
                    message,
                    reply: None,
                })
            }
            ControlMessage::PurgeAll => {
                let result = self.inner.store.purge_all();
                let answer = ControlReply {
                    success: result.is_ok(),
                };
                if let Some(reply) = reply {
                    if reply.send(answer).is_err() {
                        debug!("Purge requester went away before the reply");
                    }
                }
                let purged = result?;
                info!(purged, "Purged all generations");
                Ok(EventOutcome::Controlled {
                    message,
                    reply: Some(answer),
                })
            }
            ControlMessage::Unknown => Ok(EventOutcome::Ignored),
        }
    }

    /// Serve events from a channel until every sender is gone.
    ///
    /// Lifecycle events run one at a time in arrival order; everything
    /// else is handled concurrently.
    pub async fn serve(&self, mut events: mpsc::Receiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            let wait = self.handle(event);
            match wait.kind() {
                EventKind::Install | EventKind::Activate => log_outcome(wait).await,
                _ => {
                    tokio::spawn(log_outcome(wait));
                }
            }
        }
        debug!("Event channel closed");
    }
}

async fn log_outcome(wait: WaitUntil) {
    let kind = wait.kind();
    match wait.wait().await {
        Ok(outcome) => debug!(?kind, ?outcome, "Event handled"),
        Err(e) => error!(?kind, error = %e, "Event failed"),
    }
}
