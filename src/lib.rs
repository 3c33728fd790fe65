//! Gatekeep - the request-dispatch core of an API gateway.
//!
//! Gatekeep sits in front of independently owned backend services and, for
//! every request, decides where it goes, whether the caller may make it and
//! whether the caller is sending too much. The crate follows a **hexagonal
//! architecture**: I/O-free domain logic in `core`, traits in `ports`, and
//! concrete implementations in `adapters`.
//!
//! # Features
//! - Prefix routing from an immutable route table, longest mount path wins,
//!   mount path stripped before forwarding
//! - Case-insensitive per-route method allow lists (`405` + `Allow`)
//! - Streaming reverse proxy over a pooled hyper client with a bounded
//!   backend timeout (`502` / `504` on failure)
//! - HS256 bearer token authentication with a prefix skip-list
//! - Per-client token bucket rate limiting (`429` + `Retry-After`) with idle
//!   bucket eviction
//! - Explicit middleware chain with a per-stage panic boundary
//! - Prometheus metrics and structured tracing via `tracing`
//! - Graceful shutdown with a bounded grace period
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gatekeep::{Gateway, GracefulShutdown, HttpClientAdapter, config::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = load_config("routes.yaml").await?;
//! let client = Arc::new(HttpClientAdapter::new(cfg.backend_timeout()?)?);
//! let gateway = Gateway::from_config(&cfg, client)?;
//!
//! let shutdown = Arc::new(GracefulShutdown::new());
//! let listener = Gateway::bind(&cfg.listen_addr()).await?;
//! gateway.serve(listener, shutdown).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Domain errors are `thiserror` enums; application plumbing returns
//! `eyre::Result<T>` with `WrapErr` context. Errors produced while handling
//! a request never escape it: they become JSON error responses of the form
//! `{"success": false, "error": "..."}`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod server;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, ProxyRouter},
    core::{ClientRateLimiter, MiddlewareChain, RequestContext, RouteTable, TokenValidator},
    ports::http_client::HttpClient,
    server::{Gateway, GatewayError},
    utils::{GracefulShutdown, ShutdownReason},
};
