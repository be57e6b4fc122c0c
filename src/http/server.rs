//! HTTP server setup and serve loop.
//!
//! # Responsibilities
//! - Create the catch-all Axum Router around the forwarder
//! - Serve HTTP/1.1 and h2c connections from the bound listener
//! - On shutdown: stop accepting, drain in-flight connections up to the
//!   deadline, then abort whatever is left

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
};
use tokio::task::JoinSet;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::{ConfigError, RelayConfig, ShutdownConfig, Upstream};
use crate::http::forward::Forwarder;
use crate::lifecycle::ShutdownSignal;
use crate::net::{ConnectionTracker, Listener};
use crate::observability::{LogTraceSink, NoopSink, RequestTraceSink};

/// Pause after a failed accept so a persistent error (fd exhaustion) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for the serve loop.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// In-flight connections outlived the deadline and were aborted.
    #[error("graceful shutdown timed out after {deadline:?}; aborted {aborted} connection(s)")]
    ShutdownTimeout { deadline: Duration, aborted: u64 },

    /// The serve task panicked or was cancelled.
    #[error("serve task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    forwarder: Forwarder,
    deadline: Duration,
}

impl HttpServer {
    /// Create a server around an existing forwarder.
    pub fn new(forwarder: Forwarder, shutdown: &ShutdownConfig) -> Self {
        let router = Self::build_router(forwarder.clone());
        Self {
            router,
            forwarder,
            deadline: shutdown.deadline(),
        }
    }

    /// Create a server from validated configuration.
    ///
    /// Fails if the upstream is `https` and the OS trust store cannot be loaded.
    pub fn from_config(config: &RelayConfig, upstream: Upstream) -> Result<Self, ConfigError> {
        let traces: Arc<dyn RequestTraceSink> = if config.observability.trace_requests {
            Arc::new(LogTraceSink)
        } else {
            Arc::new(NoopSink)
        };
        let forwarder = Forwarder::new(upstream, traces).map_err(ConfigError::TrustStore)?;
        Ok(Self::new(forwarder, &config.shutdown))
    }

    /// Build the Axum router: every method on every path goes to the forwarder.
    fn build_router(forwarder: Forwarder) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            // Request targets the path router cannot match (`*`, `//x`).
            .fallback(proxy_handler)
            .with_state(forwarder)
            .layer(TraceLayer::new_for_http())
    }

    /// The upstream this server forwards to.
    pub fn upstream(&self) -> &Upstream {
        self.forwarder.upstream()
    }

    /// Graceful shutdown deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Serve connections until `shutdown` fires, then drain.
    ///
    /// Returns [`ServeError::ShutdownTimeout`] if connections were still open
    /// when the deadline passed.
    pub async fn run(self, listener: Listener, mut shutdown: ShutdownSignal) -> Result<(), ServeError> {
        let addr = listener.local_addr();
        tracing::info!(
            address = %addr,
            upstream = %self.forwarder.upstream(),
            upstream_tls = self.forwarder.upstream().is_tls(),
            "HTTP server starting"
        );

        let builder = auto::Builder::new(TokioExecutor::new());
        let graceful = GracefulShutdown::new();
        let tracker = ConnectionTracker::new();
        let mut connections = JoinSet::new();

        let reason = loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                            continue;
                        }
                    };

                    let guard = tracker.track();
                    let router = self.router.clone();
                    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
                        request.extensions_mut().insert(ConnectInfo(peer));
                        router.clone().oneshot(request)
                    });

                    let conn = builder
                        .serve_connection_with_upgrades(TokioIo::new(stream), service)
                        .into_owned();
                    let conn = graceful.watch(conn);
                    connections.spawn(async move {
                        if let Err(e) = conn.await {
                            tracing::debug!(connection_id = %guard.id(), peer = %peer, error = %e, "Connection error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                reason = shutdown.recv() => break reason,
            }
        };

        // Stop accepting before draining.
        drop(listener);

        let in_flight = tracker.active_count();
        tracing::info!(
            reason = ?reason,
            in_flight,
            deadline = ?self.deadline,
            "HTTP server draining"
        );

        match tokio::time::timeout(self.deadline, graceful.shutdown()).await {
            Ok(()) => {
                tracing::info!("HTTP server stopped");
                Ok(())
            }
            Err(_) => {
                let aborted = tracker.active_count();
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                tracing::warn!(aborted, deadline = ?self.deadline, "Forced close of remaining connections");
                Err(ServeError::ShutdownTimeout {
                    deadline: self.deadline,
                    aborted,
                })
            }
        }
    }
}

/// Catch-all handler.
async fn proxy_handler(State(forwarder): State<Forwarder>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    forwarder.forward(peer, request).await
}
