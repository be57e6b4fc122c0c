//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper auto HTTP/1.1 + h2c, Axum catch-all router)
//!     → forward.rs (rewrite target and Host, call upstream)
//!     → upstream response streamed back to the client
//! ```

pub mod forward;
pub mod server;

pub use forward::Forwarder;
pub use server::{HttpServer, ServeError};
