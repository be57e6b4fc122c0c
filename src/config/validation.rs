//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Turn the configured upstream triple into a forwardable [`Upstream`]
//! - Validate value ranges (ports, names)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<Upstream, Vec<ValidationError>>
//! - Runs once at startup; nothing downstream re-checks

use std::fmt;
use std::str::FromStr;

use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Uri};
use url::Url;

use crate::config::schema::{RelayConfig, UpstreamTarget};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("upstream host is empty")]
    EmptyHost,

    #[error("unsupported upstream scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),

    #[error("upstream port must be non-zero")]
    ZeroPort,

    #[error("upstream url {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("service name is empty")]
    EmptyServiceName,
}

/// A validated upstream, ready to rewrite requests against.
#[derive(Debug, Clone)]
pub struct Upstream {
    scheme: Scheme,
    authority: Authority,
    host: HeaderValue,
    url: String,
}

impl Upstream {
    /// Upstream scheme.
    pub fn scheme(&self) -> &Scheme {
        &self.scheme
    }

    /// `host:port` of the upstream.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Value written into the forwarded `Host` header.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host
    }

    /// Whether the connection to the upstream is TLS.
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::HTTPS
    }

    /// Rebuild `original` against the upstream, keeping path and query.
    pub fn rewrite_uri(&self, original: &Uri) -> Result<Uri, axum::http::Error> {
        let path_and_query = original
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

impl UpstreamTarget {
    /// Validate the triple and produce the forwardable form.
    pub fn resolve(&self) -> Result<Upstream, ValidationError> {
        let scheme = match self.scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::HTTP,
            "https" => Scheme::HTTPS,
            _ => return Err(ValidationError::UnsupportedScheme(self.scheme.clone())),
        };
        if self.host.trim().is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        if self.port == 0 {
            return Err(ValidationError::ZeroPort);
        }

        let url = self.url();
        let invalid = |reason: String| ValidationError::InvalidUrl {
            url: url.clone(),
            reason,
        };

        let parsed = Url::parse(&url).map_err(|e| invalid(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        // Anything past the port (a path smuggled in through the host flag)
        // would be silently dropped by the rewrite.
        if parsed.path() != "/" || parsed.query().is_some() || !parsed.username().is_empty() {
            return Err(invalid("host must not carry a path, query or userinfo".to_string()));
        }

        let authority = Authority::from_str(&format!("{}:{}", host, self.port))
            .map_err(|e| invalid(e.to_string()))?;
        let host = HeaderValue::from_str(host).map_err(|e| invalid(e.to_string()))?;

        Ok(Upstream {
            scheme,
            authority,
            host,
            url,
        })
    }
}

/// Validate the whole configuration, returning the resolved upstream.
pub fn validate_config(config: &RelayConfig) -> Result<Upstream, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let upstream = match config.upstream.resolve() {
        Ok(upstream) => Some(upstream),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }

    match upstream {
        Some(upstream) if errors.is_empty() => Ok(upstream),
        _ => Err(errors),
    }
}
