//! Gateway for a repository's GitHub issues plus an idempotent webhook log.
//!
//! Outbound calls go through [`github::GithubClient`], which applies the
//! rate-limit classifier and the ETag cache. Inbound webhooks are checked by
//! [`verification::verify`] and recorded once per (delivery id, action) in
//! [`store::EventStore`]. [`http_server`] wires both behind an axum router.

pub mod config;
pub mod error;
pub mod etag_cache;
pub mod github;
pub mod http_server;
pub mod logging;
pub mod rate_limit;
pub mod store;
pub mod types;
pub mod verification;

pub use error::{GatewayError, StoreError};
