//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (controller.rs):
//!     Bind listener → spawn serve loop → report started
//!
//! Wait:
//!     signals.rs (SIGINT/SIGTERM)            → foreground controller
//!     service.rs (stop/shutdown/interrogate) → service controller
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → drain up to deadline → abort the rest
//! ```
//!
//! # Design Decisions
//! - One `Lifecycle` contract, two controllers; the proxy core knows neither
//! - Bind failures are fatal before anything is reported as running
//! - The service variant always ends by reporting Stopped

pub mod controller;
pub mod service;
pub mod shutdown;
pub mod signals;
#[cfg(windows)]
pub mod windows;

pub use controller::{run, ForegroundController, Lifecycle, LifecycleError, ProxyRuntime};
pub use service::{
    ChannelReporter, ControlCommand, DispatchOutcome, LifecycleState, ServiceController, ServiceStatus,
    StatusReporter,
};
pub use shutdown::{Shutdown, ShutdownSignal, TerminationReason};
