//! Relay under the OS service manager, or in the foreground with `--debug`.

use std::process::ExitCode;

use clap::Parser;

use relay_proxy::config::cli::ServiceCli;
use relay_proxy::config;
use relay_proxy::lifecycle::service;
use relay_proxy::observability::logging;

fn main() -> ExitCode {
    let cli = ServiceCli::parse();

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay-service: invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.observability) {
        eprintln!("relay-service: could not initialise logging: {}", e);
        return ExitCode::FAILURE;
    }

    let upstream = match config::resolve(&config) {
        Ok(upstream) => upstream,
        Err(e) => {
            tracing::error!(service = %config.service.name, error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let name = config.service.name.clone();
    let result = if config.service.debug {
        tracing::info!(upstream = %upstream, "starting {} service (debug)", name);
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
            .and_then(|runtime| {
                runtime
                    .block_on(service::run_debug(&config, upstream))
                    .map_err(|e| e.to_string())
            })
    } else {
        service::run_managed(config, upstream).map_err(|e| e.to_string())
    };

    match result {
        Ok(()) => {
            tracing::info!("{} service stopped", name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "{} service failed", name);
            ExitCode::FAILURE
        }
    }
}
