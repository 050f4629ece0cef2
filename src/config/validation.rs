use super::models::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Ledger path must not be empty")]
    EmptyLedgerPath,

    #[error("Ledger cache size must be positive")]
    InvalidCacheSize,

    #[error("max_chunks_per_task must be positive")]
    InvalidChunkLimit,

    #[error("Retention TTL must be positive: {field} = {value}")]
    InvalidRetentionTTL { field: String, value: u32 },

    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_server(config)?;
    validate_ledger(config)?;
    validate_retention(config)?;
    validate_telemetry(config)?;
    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.ledger_path.as_os_str().is_empty() {
        return Err(ValidationError::EmptyLedgerPath);
    }
    Ok(())
}

fn validate_ledger(config: &Config) -> Result<(), ValidationError> {
    if config.ledger.cache_size_mb == 0 {
        return Err(ValidationError::InvalidCacheSize);
    }
    if config.ledger.max_chunks_per_task == 0 {
        return Err(ValidationError::InvalidChunkLimit);
    }
    Ok(())
}

fn validate_retention(config: &Config) -> Result<(), ValidationError> {
    if config.retention.task_ttl_days == 0 {
        return Err(ValidationError::InvalidRetentionTTL {
            field: "task_ttl_days".to_string(),
            value: 0,
        });
    }
    Ok(())
}

fn validate_telemetry(config: &Config) -> Result<(), ValidationError> {
    let filter = &config.telemetry.log_filter;
    tracing_subscriber::EnvFilter::try_new(filter).map_err(|e| {
        ValidationError::InvalidLogFilter {
            filter: filter.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(())
}
