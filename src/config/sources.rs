use super::models::Config;
use config::{ConfigError, Environment, File};
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "CHUNKLEDGER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/chunkledger.toml";

/// Where to read the config file from, and whether it must exist.
///
/// An explicit path wins over `CHUNKLEDGER_CONFIG`; either one must exist.
/// The default path is optional.
fn resolve_path(explicit: Option<PathBuf>, from_env: Option<String>) -> (PathBuf, bool) {
    match (explicit, from_env) {
        (Some(path), _) => (path, true),
        (None, Some(path)) => (PathBuf::from(path), true),
        (None, None) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    }
}

/// Defaults, then the TOML file, then `.env` and the process environment
/// (`CHUNKLEDGER__LEDGER__CACHE_SIZE_MB` -> `ledger.cache_size_mb`).
pub fn load(explicit: Option<PathBuf>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();
    let (path, required) = resolve_path(explicit, std::env::var(CONFIG_ENV_VAR).ok());
    tracing::debug!(path = %path.display(), required, "Loading configuration");

    config::Config::builder()
        .add_source(File::from(path).required(required))
        .add_source(
            Environment::with_prefix("CHUNKLEDGER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_path_precedence() {
        let (path, required) = resolve_path(None, None);
        assert_eq!(path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!required);

        let (path, required) = resolve_path(None, Some("/etc/cl.toml".to_string()));
        assert_eq!(path, PathBuf::from("/etc/cl.toml"));
        assert!(required);

        let (path, _) = resolve_path(Some("a.toml".into()), Some("/etc/cl.toml".to_string()));
        assert_eq!(path, PathBuf::from("a.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = load(Some(temp_dir.path().join("nonexistent.toml")));
        assert!(result.is_err());
    }
}
