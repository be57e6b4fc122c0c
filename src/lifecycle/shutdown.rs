//! Shutdown coordination for the proxy.

use std::fmt;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Why the proxy is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// SIGINT / Ctrl-C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// Stop control command from the service manager.
    Stop,
    /// System shutdown control command from the service manager.
    Shutdown,
    /// The control command source went away.
    ControlChannelClosed,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationReason::Interrupt => "interrupt signal",
            TerminationReason::Terminate => "terminate signal",
            TerminationReason::Stop => "stop command",
            TerminationReason::Shutdown => "shutdown command",
            TerminationReason::ControlChannelClosed => "control channel closed",
        };
        f.write_str(s)
    }
}

/// Coordinator for graceful shutdown.
///
/// One trigger, any number of subscribers. Subscribe before spawning the task
/// that waits, so a trigger can never be missed.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<TerminationReason>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Returns how many subscribers were listening.
    pub fn trigger(&self, reason: TerminationReason) -> usize {
        self.tx.send(reason).unwrap_or(0)
    }

    /// Subscribers still holding a signal.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half handed to long-running tasks.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: broadcast::Receiver<TerminationReason>,
}

impl ShutdownSignal {
    /// Wait for the trigger.
    ///
    /// `None` means every [`Shutdown`] handle was dropped without triggering;
    /// callers treat that as a stop as well.
    pub async fn recv(&mut self) -> Option<TerminationReason> {
        loop {
            match self.rx.recv().await {
                Ok(reason) => return Some(reason),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
