//! Foreground relay: serves until SIGINT/SIGTERM, then drains and exits.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use relay_proxy::config::cli::ProxyCli;
use relay_proxy::config;
use relay_proxy::http::HttpServer;
use relay_proxy::lifecycle::{self, ForegroundController};
use relay_proxy::observability::{logging, ConsoleSink, LogSink};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ProxyCli::parse();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay-proxy: invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.observability) {
        eprintln!("relay-proxy: could not initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let upstream = match config::resolve(&config) {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        upstream = %upstream,
        listen_port = config.server.listen_port,
        shutdown_timeout_secs = config.shutdown.timeout_secs,
        "relay-proxy v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let sink: Arc<dyn LogSink> = Arc::new(ConsoleSink::new("relay-proxy"));
    let server = match HttpServer::from_config(&config, upstream) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    let controller = ForegroundController::new(server, config.server.clone(), sink);

    match lifecycle::run(controller).await {
        Ok(reason) => {
            tracing::info!(reason = %reason, "Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Exiting with failure");
            ExitCode::FAILURE
        }
    }
}
