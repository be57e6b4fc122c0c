//! Command line flags.
//!
//! Flags are optional overrides: defaults come from [`RelayConfig::default`],
//! then the `--config` file, then whatever was passed on the command line.

use std::path::PathBuf;

use clap::{Args, Parser};

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::{LogFormat, RelayConfig};

/// Flags shared by the foreground and service binaries.
#[derive(Debug, Clone, Args, Default)]
pub struct ProxyArgs {
    /// Host to proxy requests to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to proxy requests to [default: 443]
    #[arg(long = "host-port")]
    pub host_port: Option<u16>,

    /// Scheme to use towards the upstream [default: https]
    #[arg(long)]
    pub scheme: Option<String>,

    /// Port to bind the reverse proxy to [default: 9090]
    #[arg(long)]
    pub port: Option<u16>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset [default: info]
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long = "log-format", value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Log every request before forwarding it
    #[arg(long = "trace-requests")]
    pub trace_requests: bool,

    /// Seconds to wait for in-flight requests on shutdown [default: 5]
    #[arg(long = "shutdown-timeout")]
    pub shutdown_timeout: Option<u64>,
}

impl ProxyArgs {
    /// Build the effective configuration: defaults, then file, then flags.
    pub fn to_config(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => RelayConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.upstream.host = host.clone();
        }
        if let Some(port) = self.host_port {
            config.upstream.port = port;
        }
        if let Some(scheme) = &self.scheme {
            config.upstream.scheme = scheme.clone();
        }
        if let Some(port) = self.port {
            config.server.listen_port = port;
        }
        if let Some(level) = &self.log_level {
            config.observability.log_level = level.clone();
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if self.trace_requests {
            config.observability.trace_requests = true;
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown.timeout_secs = secs;
        }
    }
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format {:?} (expected pretty or json)", other)),
    }
}

/// Foreground reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "relay-proxy")]
#[command(about = "Forward every request on a local port to a single upstream host", long_about = None)]
pub struct ProxyCli {
    #[command(flatten)]
    pub proxy: ProxyArgs,
}

impl ProxyCli {
    pub fn to_config(&self) -> Result<RelayConfig, ConfigError> {
        self.proxy.to_config()
    }
}

/// Reverse proxy running under the OS service manager.
#[derive(Debug, Parser)]
#[command(name = "relay-service")]
#[command(about = "Run the single-host reverse proxy as a managed service", long_about = None)]
pub struct ServiceCli {
    #[command(flatten)]
    pub proxy: ProxyArgs,

    /// Name of the registered service [default: relay-proxy]
    #[arg(long = "service-name")]
    pub service_name: Option<String>,

    /// Run in the foreground with console logging instead of registering
    #[arg(long)]
    pub debug: bool,
}

impl ServiceCli {
    pub fn to_config(&self) -> Result<RelayConfig, ConfigError> {
        let mut config = self.proxy.to_config()?;
        if let Some(name) = &self.service_name {
            config.service.name = name.clone();
        }
        if self.debug {
            config.service.debug = true;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = ProxyCli::try_parse_from([
            "relay-proxy",
            "--host",
            "example.internal",
            "--port",
            "8000",
            "--shutdown-timeout",
            "1",
        ])
        .unwrap();
        let config = cli.to_config().unwrap();

        assert_eq!(config.upstream.url(), "https://example.internal:443");
        assert_eq!(config.server.listen_port, 8000);
        assert_eq!(config.shutdown.timeout_secs, 1);
        assert!(!config.observability.trace_requests);
    }

    #[test]
    fn bare_invocation_uses_defaults() {
        let cli = ProxyCli::try_parse_from(["relay-proxy"]).unwrap();
        assert_eq!(cli.to_config().unwrap(), RelayConfig::default());
    }

    #[test]
    fn service_flags() {
        let cli = ServiceCli::try_parse_from([
            "relay-service",
            "--host",
            "example.internal",
            "--scheme",
            "http",
            "--host-port",
            "8080",
            "--service-name",
            "edge-relay",
            "--debug",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = cli.to_config().unwrap();

        assert_eq!(config.upstream.url(), "http://example.internal:8080");
        assert_eq!(config.service.name, "edge-relay");
        assert!(config.service.debug);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(ProxyCli::try_parse_from(["relay-proxy", "--log-format", "xml"]).is_err());
    }
}
