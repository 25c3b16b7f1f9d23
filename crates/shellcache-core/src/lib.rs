//! Offline cache and request-interception layer.
//!
//! This crate sits between a web client and its origin server and decides,
//! for every outgoing request, whether to answer from a local versioned store
//! or from the network. It also delivers push notifications, runs deferred
//! background-sync work and accepts control commands from the foreground
//! client.
//!
//! - `store`: versioned key/response store with generation eviction
//! - `strategy`: request classification and the two fetch strategies
//! - `notify`: push payload decoding and notification click routing
//! - `sync`: tag-named background sync work
//! - `control`: force-activate / purge-all control messages
//! - `worker`: the process-wide context, lifecycle and event dispatch

pub mod config;
pub mod control;
pub mod error;
pub mod http;
pub mod notify;
pub mod store;
pub mod strategy;
pub mod sync;
pub mod utils;
pub mod worker;

pub use config::WorkerConfig;
pub use control::{ControlClient, ControlMessage, ControlReply};
pub use error::{FailureKind, FetchError, StoreError, WorkerError};
pub use http::{Fetcher, HttpFetcher, Request, RequestKey, Response, ResponseType};
pub use notify::{
    ClickOutcome, ClientSurface, ClientSurfaces, Notification, NotificationPayload, Notifier,
};
pub use store::{Generation, StoredResponse, VersionedStore};
pub use strategy::{RouteSource, RoutedResponse, StrategyRouter};
pub use sync::{LoggingConsumer, SnapshotConsumer, SyncOutcome, SyncRetryQueue};
pub use worker::{
    Collaborators, EventKind, EventOutcome, HostEvent, WaitUntil, Worker, WorkerState,
};
