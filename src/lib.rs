//! Single-host reverse proxy.
//!
//! Every request on the local port, whatever its method or path, is forwarded
//! to one configured upstream with only the `Host` header rewritten. The
//! proxy runs either in the foreground (stopped by SIGINT/SIGTERM) or under
//! the OS service manager.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net::Listener ──▶ http::HttpServer ──▶ http::Forwarder ──▶ Upstream
//!                                      ▲
//!                                      │ start / drain with deadline
//!                          lifecycle::{ForegroundController, ServiceController}
//!                                      ▲
//!                   OS signals ────────┴──────── service control commands
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::{RelayConfig, Upstream, UpstreamTarget};
pub use http::{Forwarder, HttpServer};
pub use lifecycle::{Lifecycle, Shutdown};
