//! Forwarding to the upstream.
//!
//! # Responsibilities
//! - Own the upstream HTTP client (plain HTTP, or TLS for `https` verified
//!   against the OS trust store)
//! - Rewrite the request target and `Host` header
//! - Stream the upstream response back unchanged
//! - Map upstream connection failures to 502
//!
//! # Design Decisions
//! - No retries, no timeout beyond the client's defaults, no caching
//! - Hop-by-hop headers belong to one connection and are not forwarded
//! - Per-request failures never reach the lifecycle layer

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{Request, Response, StatusCode, Version};
use axum::response::IntoResponse;
use hyper_rustls::{ConfigBuilderExt, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::{ClientConfig, RootCertStore};
use uuid::Uuid;

use crate::config::Upstream;
use crate::observability::{RequestTrace, RequestTraceSink};

/// Client type used to reach the upstream.
pub type UpstreamClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Headers scoped to a single hop (RFC 9110 §7.6.1).
static HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwards every request to a single upstream.
#[derive(Clone)]
pub struct Forwarder {
    upstream: Arc<Upstream>,
    client: UpstreamClient,
    traces: Arc<dyn RequestTraceSink>,
}

impl Forwarder {
    /// Build a forwarder for `upstream`, reporting traces to `traces`.
    ///
    /// `https` upstreams are verified against the OS trust store; failing to
    /// load it is an error. Plain `http` upstreams never touch it.
    pub fn new(upstream: Upstream, traces: Arc<dyn RequestTraceSink>) -> io::Result<Self> {
        let tls = upstream_tls_config(upstream.is_tls())?;
        Ok(Self::with_tls_config(upstream, tls, traces))
    }

    /// Build a forwarder that verifies the upstream with `tls`.
    pub fn with_tls_config(upstream: Upstream, tls: ClientConfig, traces: Arc<dyn RequestTraceSink>) -> Self {
        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new()).build(https);

        Self {
            upstream: Arc::new(upstream),
            client,
            traces,
        }
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    /// Forward one request and return the upstream's response.
    ///
    /// Never fails: an unreachable upstream becomes `502 Bad Gateway`.
    pub async fn forward(&self, peer: Option<SocketAddr>, request: Request<Body>) -> Response<Body> {
        let request_id = Uuid::new_v4();
        let (mut parts, body) = request.into_parts();

        if self.traces.enabled() {
            self.traces.record(&RequestTrace::capture(request_id, peer, &parts));
        }

        parts.uri = match self.upstream.rewrite_uri(&parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::warn!(request_id = %request_id, uri = %parts.uri, error = %e, "Cannot rewrite request target");
                return (StatusCode::BAD_REQUEST, "Bad request target").into_response();
            }
        };
        strip_hop_by_hop(&mut parts.headers);
        parts
            .headers
            .insert(header::HOST, self.upstream.host_header().clone());
        parts.version = Version::HTTP_11;

        tracing::debug!(
            request_id = %request_id,
            method = %parts.method,
            uri = %parts.uri,
            "Forwarding request"
        );

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    upstream = %self.upstream,
                    error = %e,
                    "Upstream request failed"
                );
                (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
            }
        }
    }
}

/// Client TLS settings for the upstream connection.
fn upstream_tls_config(native_roots: bool) -> io::Result<ClientConfig> {
    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?;

    let builder = if native_roots {
        builder.with_native_roots()?
    } else {
        builder.with_root_certificates(RootCertStore::empty())
    };
    Ok(builder.with_no_client_auth())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn strips_hop_by_hop_and_connection_listed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session-hop"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session-hop", HeaderValue::from_static("1"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-custom"], "kept");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer t");
    }

    #[test]
    fn plain_http_upstream_needs_no_trust_store() {
        let upstream = crate::config::UpstreamTarget::new("http", "127.0.0.1", 8080)
            .resolve()
            .unwrap();
        let forwarder = Forwarder::new(upstream, Arc::new(crate::observability::NoopSink)).unwrap();
        assert!(!forwarder.upstream().is_tls());
    }
}
