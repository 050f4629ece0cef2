//! Configuration management for chunkledger
//!
//! Settings are layered, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables
//!
//! # Usage
//!
//! ```no_run
//! use chunkledger::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Operator API listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `CHUNKLEDGER__<section>__<key>`:
//! - `CHUNKLEDGER__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `CHUNKLEDGER__LEDGER__CACHE_SIZE_MB=128`
//! - `CHUNKLEDGER__RETENTION__TASK_TTL_DAYS=7`
//!
//! # Configuration File
//!
//! By default the file is `config/chunkledger.toml`; `CHUNKLEDGER_CONFIG`
//! points elsewhere.

mod models;
mod sources;
mod validation;

pub use models::{Config, LedgerConfig, RetentionConfig, ServerConfig, TelemetryConfig};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or a value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, which must exist
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load(Some(path))?;
        validation::validate(&config)?;
        Ok(config)
    }
}
