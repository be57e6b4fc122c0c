//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → sink.rs (lifecycle entries: console or OS event log)
//!     → trace.rs (per-request snapshots, opt-in)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Request traces are best-effort and never block the request path
//! - Where lifecycle entries go is picked once at startup

pub mod logging;
pub mod sink;
pub mod trace;

pub use sink::{ConsoleSink, LogSink};
pub use trace::{ChannelTraceSink, LogTraceSink, NoopSink, RequestTrace, RequestTraceSink};
