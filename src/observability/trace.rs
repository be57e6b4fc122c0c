//! Best-effort request traces.
//!
//! The forwarder hands a [`RequestTrace`] to its sink before every upstream
//! call. Sinks must return immediately and must never fail the request: a
//! full or closed destination drops the trace.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::{request, HeaderMap, Method, Uri, Version};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Snapshot of an inbound request, taken before the Host rewrite.
#[derive(Debug, Clone)]
pub struct RequestTrace {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestTrace {
    pub fn capture(id: Uuid, peer: Option<SocketAddr>, parts: &request::Parts) -> Self {
        Self {
            id,
            peer,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }
}

/// Destination for request traces.
pub trait RequestTraceSink: Send + Sync {
    /// Whether traces should be captured at all.
    fn enabled(&self) -> bool {
        true
    }

    fn record(&self, trace: &RequestTrace);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl RequestTraceSink for NoopSink {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&self, _trace: &RequestTrace) {}
}

/// Emits each trace as a tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl RequestTraceSink for LogTraceSink {
    fn record(&self, trace: &RequestTrace) {
        tracing::info!(
            request_id = %trace.id,
            peer = ?trace.peer,
            method = %trace.method,
            uri = %trace.uri,
            version = ?trace.version,
            headers = ?trace.headers,
            "Incoming request"
        );
    }
}

/// Hands traces to a bounded channel without waiting.
#[derive(Debug)]
pub struct ChannelTraceSink {
    tx: mpsc::Sender<RequestTrace>,
    dropped: AtomicU64,
}

impl ChannelTraceSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RequestTrace>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Traces lost to a full or closed channel.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RequestTraceSink for ChannelTraceSink {
    fn record(&self, trace: &RequestTrace) {
        if self.tx.try_send(trace.clone()).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!(request_id = %trace.id, dropped, "Request trace dropped");
        }
    }
}
