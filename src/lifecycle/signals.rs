//! OS signal handling.
//!
//! # Responsibilities
//! - Register SIGINT and SIGTERM handlers (Ctrl-C elsewhere)
//! - Resolve to the [`TerminationReason`] that fired first
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Registration failure is returned, not panicked on

use crate::lifecycle::TerminationReason;

/// Completes when the process is asked to stop.
pub async fn termination() -> std::io::Result<TerminationReason> {
    imp::termination().await
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{signal, SignalKind};

    use crate::lifecycle::TerminationReason;

    pub(super) async fn termination() -> std::io::Result<TerminationReason> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        let reason = tokio::select! {
            _ = interrupt.recv() => TerminationReason::Interrupt,
            _ = terminate.recv() => TerminationReason::Terminate,
        };
        tracing::info!(
            target: "relay_proxy::signals",
            reason = %reason,
            "Received signal, starting shutdown"
        );
        Ok(reason)
    }
}

#[cfg(not(unix))]
mod imp {
    use crate::lifecycle::TerminationReason;

    pub(super) async fn termination() -> std::io::Result<TerminationReason> {
        tokio::signal::ctrl_c().await?;
        tracing::info!(
            target: "relay_proxy::signals",
            "Received Ctrl-C, starting shutdown"
        );
        Ok(TerminationReason::Interrupt)
    }
}
