//! Request/response model and the network seam.
//!
//! Everything that leaves the worker goes through the [`Fetcher`] trait.
//! [`HttpFetcher`] is the reqwest-backed implementation; tests substitute a
//! scripted fetcher so no strategy ever touches a real socket.

pub mod fetcher;
#[cfg(test)]
pub(crate) mod mock;
pub mod request;
pub mod response;

pub use fetcher::{Fetcher, HttpFetcher};
pub use request::{Request, RequestKey};
pub use response::{Response, ResponseType};
