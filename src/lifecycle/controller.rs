//! Lifecycle controllers.
//!
//! Both deployment variants drive the proxy through the same three steps,
//! captured by [`Lifecycle`]: start serving, wait for a termination trigger,
//! stop with a bounded drain. [`ForegroundController`] waits on OS signals;
//! [`ServiceController`](crate::lifecycle::ServiceController) waits on service
//! control commands and reports status along the way.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{ConfigError, ServerConfig};
use crate::http::{HttpServer, ServeError};
use crate::lifecycle::shutdown::{Shutdown, TerminationReason};
use crate::lifecycle::signals;
use crate::net::{Listener, ListenerError};
use crate::observability::LogSink;

/// Error type for lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("could not start server: {0}")]
    Bind(#[from] ListenerError),

    #[error("could not stop proxy server: {0}")]
    Serve(#[from] ServeError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("service registration failed: {0}")]
    Registration(String),

    #[error("proxy server already started")]
    AlreadyStarted,

    #[error("proxy server was not started")]
    NotStarted,
}

/// Start, wait, stop.
#[allow(async_fn_in_trait)]
pub trait Lifecycle {
    /// Bind and begin serving in the background. Bind failure is fatal.
    async fn start(&mut self) -> Result<SocketAddr, LifecycleError>;

    /// Suspend until something asks the proxy to stop.
    async fn await_termination(&mut self) -> TerminationReason;

    /// Drain in-flight requests up to the configured deadline.
    async fn graceful_stop(self, reason: TerminationReason) -> Result<(), LifecycleError>;
}

/// Drive a controller through its whole life.
pub async fn run<L: Lifecycle>(mut lifecycle: L) -> Result<TerminationReason, LifecycleError> {
    lifecycle.start().await?;
    let reason = lifecycle.await_termination().await;
    lifecycle.graceful_stop(reason).await?;
    Ok(reason)
}

/// The proxy server plus the background task serving it.
pub struct ProxyRuntime {
    server: Option<HttpServer>,
    bind: ServerConfig,
    shutdown: Shutdown,
    task: Option<JoinHandle<Result<(), ServeError>>>,
    local_addr: Option<SocketAddr>,
}

impl ProxyRuntime {
    pub fn new(server: HttpServer, bind: ServerConfig) -> Self {
        Self {
            server: Some(server),
            bind,
            shutdown: Shutdown::new(),
            task: None,
            local_addr: None,
        }
    }

    /// Bind the listener, then spawn the serve loop.
    ///
    /// The listener is bound before this returns, so callers can start
    /// waiting for termination knowing connections are being accepted.
    pub async fn start(&mut self) -> Result<SocketAddr, LifecycleError> {
        let server = self.server.take().ok_or(LifecycleError::AlreadyStarted)?;
        let listener = Listener::bind(&self.bind).await?;
        let addr = listener.local_addr();

        let signal = self.shutdown.subscribe();
        self.task = Some(tokio::spawn(server.run(listener, signal)));
        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal the serve loop and wait for its drain to finish.
    pub async fn stop(&mut self, reason: TerminationReason) -> Result<(), LifecycleError> {
        let task = self.task.take().ok_or(LifecycleError::NotStarted)?;
        self.shutdown.trigger(reason);
        task.await.map_err(ServeError::from)??;
        Ok(())
    }
}

type TerminationFuture = Pin<Box<dyn Future<Output = std::io::Result<TerminationReason>> + Send>>;

/// Foreground controller driven by SIGINT/SIGTERM.
pub struct ForegroundController {
    runtime: ProxyRuntime,
    sink: Arc<dyn LogSink>,
    termination: Option<TerminationFuture>,
}

impl ForegroundController {
    pub fn new(server: HttpServer, bind: ServerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self::with_termination(server, bind, sink, signals::termination())
    }

    /// Use `termination` instead of OS signals as the stop trigger.
    pub fn with_termination<F>(server: HttpServer, bind: ServerConfig, sink: Arc<dyn LogSink>, termination: F) -> Self
    where
        F: Future<Output = std::io::Result<TerminationReason>> + Send + 'static,
    {
        Self {
            runtime: ProxyRuntime::new(server, bind),
            sink,
            termination: Some(Box::pin(termination)),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.local_addr()
    }
}

impl Lifecycle for ForegroundController {
    async fn start(&mut self) -> Result<SocketAddr, LifecycleError> {
        match self.runtime.start().await {
            Ok(addr) => {
                self.sink.info(&format!("started reverse proxy on {}", addr));
                Ok(addr)
            }
            Err(e) => {
                self.sink.error(&e.to_string());
                Err(e)
            }
        }
    }

    async fn await_termination(&mut self) -> TerminationReason {
        let Some(termination) = self.termination.take() else {
            return TerminationReason::ControlChannelClosed;
        };
        match termination.await {
            Ok(reason) => reason,
            Err(e) => {
                // Without signal handlers nothing could stop us later either.
                self.sink.error(&format!("could not listen for termination signals: {}", e));
                TerminationReason::Terminate
            }
        }
    }

    async fn graceful_stop(mut self, reason: TerminationReason) -> Result<(), LifecycleError> {
        match self.runtime.stop(reason).await {
            Ok(()) => {
                self.sink.info("stopped reverse proxy");
                Ok(())
            }
            Err(e) => {
                self.sink.error(&e.to_string());
                Err(e)
            }
        }
    }
}
