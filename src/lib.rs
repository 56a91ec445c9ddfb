//! # Translation Proxy
//!
//! A caching, deduplicating proxy middleware sitting between a browser
//! extension and an upstream LLM HTTP endpoint. Incoming translation
//! requests are fingerprinted, served from a TTL+LRU cache when possible,
//! coalesced with any identical in-flight request, admitted through a
//! per-client rate limiter and auth-failure lockout, and bounded by a
//! concurrency gate before reaching upstream.
//!
//! ## Architecture
//!
//! - [`config`] — CLI/env/`.env` configuration
//! - [`fingerprint`] — deterministic request keys
//! - [`cache`] — TTL+LRU translation cache
//! - [`dedup`] — in-flight request coalescing
//! - [`rate_limit`] — per-client token bucket admission
//! - [`auth_limiter`] — sliding-window auth lockout
//! - [`concurrency_gate`] — bounded upstream fan-out
//! - [`streaming_parser`] — incremental JSON-string-array parsing
//! - [`upstream`] — the upstream LLM HTTP client
//! - [`pipeline`] — ties every component together per request
//! - [`error`] — the shared error taxonomy
//! - [`metrics`] — ambient request counters
//! - [`server`] — HTTP front end (feature `server`)

pub mod core;
pub mod config;
pub mod error;
pub mod schemas;

pub mod fingerprint;
pub mod cache;
pub mod dedup;
pub mod rate_limit;
pub mod auth_limiter;
pub mod concurrency_gate;
pub mod streaming_parser;
pub mod upstream;
pub mod pipeline;
pub mod metrics;

#[cfg(feature = "server")]
pub mod server;

pub use config::Config;
pub use error::ProxyError;
pub use fingerprint::Fingerprint;
pub use pipeline::RequestPipeline;

#[cfg(feature = "server")]
pub use server::{create_router, AppState};

/// The result type used throughout the library.
pub type Result<T> = std::result::Result<T, ProxyError>;
