use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Operator API listener and ledger location
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ledger_path: default_ledger_path(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger")
}

/// Storage tuning for the Fjall keyspace
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u64,
    /// Upper bound on `num_of_chunks` accepted at submission
    #[serde(default = "default_max_chunks_per_task")]
    pub max_chunks_per_task: u16,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cache_size_mb: default_cache_size_mb(),
            max_chunks_per_task: default_max_chunks_per_task(),
        }
    }
}

fn default_cache_size_mb() -> u64 {
    32
}

fn default_max_chunks_per_task() -> u16 {
    1024
}

/// Retention configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Finished tasks older than this are pruned together with their chunks
    /// and reservations
    #[serde(default = "default_task_ttl_days")]
    pub task_ttl_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            task_ttl_days: default_task_ttl_days(),
        }
    }
}

fn default_task_ttl_days() -> u32 {
    30
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "chunkledger=info,tower_http=info".to_string()
}
