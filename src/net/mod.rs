//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind once, accept loop)
//!     → connection.rs (id + in-flight count)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Binding happens before serving starts so a taken port fails startup
//! - Each connection is counted so shutdown can report what it aborted
//! - No TLS on the listener; the relay speaks plain HTTP locally

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{Listener, ListenerError};
