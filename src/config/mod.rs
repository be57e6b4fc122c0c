//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! RelayConfig::default()
//!     → loader.rs (optional TOML file via --config)
//!     → cli.rs (command line overrides)
//!     → validation.rs (semantic checks, resolve upstream)
//!     → RelayConfig + Upstream (validated, immutable)
//!     → shared via Arc with the running server
//! ```
//!
//! # Design Decisions
//! - Config is immutable once validated; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde/clap) from semantic checks

pub mod cli;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{
    LogFormat, ObservabilityConfig, RelayConfig, ServerConfig, ServiceIdentity, ShutdownConfig,
    UpstreamTarget,
};
pub use validation::{validate_config, Upstream, ValidationError};

/// Validate a loaded configuration, resolving the upstream.
pub fn resolve(config: &RelayConfig) -> Result<Upstream, ConfigError> {
    validate_config(config).map_err(ConfigError::Validation)
}
