//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// The single upstream every request is forwarded to.
    pub upstream: UpstreamTarget,

    /// Local listener settings.
    pub server: ServerConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Service manager identity (service variant only).
    pub service: ServiceIdentity,

    /// Logging and request tracing.
    pub observability: ObservabilityConfig,
}

/// Upstream scheme, host and port.
///
/// Combined into `scheme://host:port` at startup. See
/// [`UpstreamTarget::resolve`] for the validated form.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamTarget {
    /// `http` or `https`.
    pub scheme: String,

    /// Upstream hostname. Required.
    pub host: String,

    /// Upstream port.
    pub port: u16,
}

impl UpstreamTarget {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// The upstream URL exactly as configured.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl Default for UpstreamTarget {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            host: String::new(),
            port: 443,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Local port to accept plain HTTP on. `0` picks an ephemeral port.
    pub listen_port: u16,

    /// Interface to bind.
    pub bind_ip: IpAddr,
}

impl ServerConfig {
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.listen_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 9090,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after the stop signal, in seconds.
    pub timeout_secs: u64,
}

impl ShutdownConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

/// Identity used when registering with the OS service manager.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceIdentity {
    /// Registered service name. Also the event log source.
    pub name: String,

    /// Run in the foreground with console logging instead of registering.
    pub debug: bool,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            name: "relay-proxy".to_string(),
            debug: false,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Human readable or JSON lines.
    pub log_format: LogFormat,

    /// Emit a diagnostic trace for every request before forwarding.
    pub trace_requests: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            trace_requests: false,
        }
    }
}
