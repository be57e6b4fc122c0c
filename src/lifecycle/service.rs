//! Service variant of the lifecycle controller.
//!
//! # State Machine
//! ```text
//! StartPending → Running → StopPending → Stopped
//!                  ↺ Interrogate (status echoed twice, 100ms apart)
//! ```
//!
//! Control commands arrive on a channel fed by the platform dispatcher (the
//! Windows service control handler, or signals in debug mode). Status goes
//! out through a [`StatusReporter`], which never blocks the controller.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::{RelayConfig, Upstream};
use crate::http::HttpServer;
use crate::lifecycle::controller::{self, Lifecycle, LifecycleError, ProxyRuntime};
use crate::lifecycle::shutdown::TerminationReason;
use crate::lifecycle::signals;
use crate::observability::{ConsoleSink, LogSink};

/// Gap between the two status echoes sent for an Interrogate command.
pub const INTERROGATE_ECHO_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the status handoff channel.
pub const STATUS_CHANNEL_CAPACITY: usize = 16;

/// Extra time granted to the manager on top of the drain deadline.
const STOP_WAIT_SLACK: Duration = Duration::from_secs(1);

/// Service state as reported to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

impl LifecycleState {
    /// Transitions only move forward, one step at a time, except that a
    /// failed start may jump straight to Stopped.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (StartPending, Running) | (StartPending, Stopped) | (Running, StopPending) | (StopPending, Stopped)
        )
    }
}

/// A command from the service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Stop,
    Shutdown,
    Interrogate,
    Pause,
    Continue,
    Other(String),
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Stop => f.write_str("stop"),
            ControlCommand::Shutdown => f.write_str("shutdown"),
            ControlCommand::Interrogate => f.write_str("interrogate"),
            ControlCommand::Pause => f.write_str("pause"),
            ControlCommand::Continue => f.write_str("continue"),
            ControlCommand::Other(name) => f.write_str(name),
        }
    }
}

/// One status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: LifecycleState,
    /// Whether control commands are accepted in this state.
    pub accepts_controls: bool,
    /// Non-zero when the service stopped because of an error.
    pub exit_code: u32,
    /// How long the manager should wait before assuming a pending state hung.
    pub wait_hint: Duration,
}

impl ServiceStatus {
    fn new(state: LifecycleState) -> Self {
        Self {
            state,
            accepts_controls: state == LifecycleState::Running,
            exit_code: 0,
            wait_hint: Duration::ZERO,
        }
    }

    /// Final status. A non-zero `exit_code` tells the manager the service failed.
    pub fn stopped(exit_code: u32) -> Self {
        Self {
            exit_code,
            ..Self::new(LifecycleState::Stopped)
        }
    }
}

/// Outbound status channel to the service manager.
///
/// Implementations must not block.
pub trait StatusReporter: Send {
    fn report(&self, status: ServiceStatus);
}

/// Bounded, non-blocking handoff to whoever talks to the manager.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ServiceStatus>,
}

impl ChannelReporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServiceStatus>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, status: ServiceStatus) {
        match self.tx.try_send(status) {
            Ok(()) => {}
            Err(TrySendError::Full(status)) => {
                tracing::error!(state = ?status.state, "Status channel full, report dropped");
            }
            Err(TrySendError::Closed(status)) => {
                tracing::error!(state = ?status.state, "Status channel closed, report dropped");
            }
        }
    }
}

/// Failure handed from the dispatcher's service thread back to the caller.
///
/// The OS dispatcher only says whether dispatching worked; whatever failed
/// inside the service itself is recorded here.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    failure: Mutex<Option<LifecycleError>>,
}

impl DispatchOutcome {
    pub const fn new() -> Self {
        Self {
            failure: Mutex::new(None),
        }
    }

    /// Record a failure. The first one is kept.
    pub fn fail(&self, error: LifecycleError) {
        if let Ok(mut failure) = self.failure.lock() {
            if failure.is_none() {
                *failure = Some(error);
            }
        }
    }

    /// Combine the dispatcher's own result with any recorded failure.
    pub fn finish(&self, dispatched: Result<(), LifecycleError>) -> Result<(), LifecycleError> {
        dispatched?;
        match self.failure.lock().ok().and_then(|mut failure| failure.take()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Controller driven by service control commands.
pub struct ServiceController<R> {
    runtime: ProxyRuntime,
    sink: Arc<dyn LogSink>,
    reporter: R,
    commands: mpsc::UnboundedReceiver<ControlCommand>,
    current: ServiceStatus,
    stop_wait_hint: Duration,
}

impl<R: StatusReporter> ServiceController<R> {
    pub fn new(
        server: HttpServer,
        config: &RelayConfig,
        sink: Arc<dyn LogSink>,
        reporter: R,
        commands: mpsc::UnboundedReceiver<ControlCommand>,
    ) -> Self {
        let stop_wait_hint = server.deadline() + STOP_WAIT_SLACK;
        Self {
            runtime: ProxyRuntime::new(server, config.server.clone()),
            sink,
            reporter,
            commands,
            current: ServiceStatus::new(LifecycleState::StartPending),
            stop_wait_hint,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.current.state
    }

    fn transition(&mut self, state: LifecycleState, exit_code: u32) {
        if !self.current.state.can_transition_to(state) {
            tracing::error!(from = ?self.current.state, to = ?state, "Invalid lifecycle transition ignored");
            return;
        }
        let mut status = ServiceStatus::new(state);
        status.exit_code = exit_code;
        if state == LifecycleState::StopPending {
            status.wait_hint = self.stop_wait_hint;
        }
        tracing::debug!(state = ?state, exit_code, "Service state change");
        self.current = status.clone();
        self.reporter.report(status);
    }

    async fn echo_status(&self) {
        self.reporter.report(self.current.clone());
        tokio::time::sleep(INTERROGATE_ECHO_INTERVAL).await;
        self.reporter.report(self.current.clone());
    }
}

impl<R: StatusReporter> Lifecycle for ServiceController<R> {
    async fn start(&mut self) -> Result<SocketAddr, LifecycleError> {
        self.reporter.report(self.current.clone());

        match self.runtime.start().await {
            Ok(addr) => {
                self.transition(LifecycleState::Running, 0);
                self.sink.info("started reverse proxy");
                Ok(addr)
            }
            Err(e) => {
                self.sink.error(&e.to_string());
                self.transition(LifecycleState::Stopped, 1);
                Err(e)
            }
        }
    }

    async fn await_termination(&mut self) -> TerminationReason {
        loop {
            let Some(command) = self.commands.recv().await else {
                self.sink.error("control channel closed, stopping");
                return TerminationReason::ControlChannelClosed;
            };
            match command {
                ControlCommand::Interrogate => self.echo_status().await,
                ControlCommand::Stop => return TerminationReason::Stop,
                ControlCommand::Shutdown => return TerminationReason::Shutdown,
                other => self.sink.error(&format!("unexpected control request {}", other)),
            }
        }
    }

    /// Always ends in Stopped. A drain that overran its deadline is logged,
    /// not returned: the service itself stopped as asked.
    async fn graceful_stop(mut self, reason: TerminationReason) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::StopPending, 0);

        match self.runtime.stop(reason).await {
            Ok(()) => self.sink.info("stopped reverse proxy"),
            Err(e) => self.sink.error(&e.to_string()),
        }
        self.transition(LifecycleState::Stopped, 0);
        Ok(())
    }
}

/// Run the service state machine in the foreground.
///
/// Statuses are logged instead of reported and the first SIGINT/SIGTERM
/// becomes a Stop command.
pub async fn run_debug(config: &RelayConfig, upstream: Upstream) -> Result<(), LifecycleError> {
    let server = HttpServer::from_config(config, upstream)?;
    let sink: Arc<dyn LogSink> = Arc::new(ConsoleSink::new(&config.service.name));
    let (reporter, mut statuses) = ChannelReporter::new(STATUS_CHANNEL_CAPACITY);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let status_log = tokio::spawn(async move {
        while let Some(status) = statuses.recv().await {
            tracing::info!(
                state = ?status.state,
                accepts_controls = status.accepts_controls,
                exit_code = status.exit_code,
                "Service status"
            );
        }
    });

    let signal_sink = Arc::clone(&sink);
    let signal_task = tokio::spawn(async move {
        if let Err(e) = signals::termination().await {
            signal_sink.error(&format!("could not listen for termination signals: {}", e));
        }
        let _ = commands_tx.send(ControlCommand::Stop);
    });

    let service = ServiceController::new(server, config, sink, reporter, commands_rx);
    let result = controller::run(service).await.map(|_| ());

    signal_task.abort();
    let _ = status_log.await;
    result
}

/// Register with the OS service manager and run until stopped.
#[cfg(windows)]
pub fn run_managed(config: RelayConfig, upstream: Upstream) -> Result<(), LifecycleError> {
    crate::lifecycle::windows::run_dispatcher(config, upstream)
}

/// Register with the OS service manager and run until stopped.
#[cfg(not(windows))]
pub fn run_managed(config: RelayConfig, _upstream: Upstream) -> Result<(), LifecycleError> {
    Err(LifecycleError::Registration(format!(
        "{}: no OS service manager integration on this platform, run with --debug",
        config.service.name
    )))
}
