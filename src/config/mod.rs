use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite settings.
    pub database: DatabaseConfig,
    /// Log level and output format.
    pub logging: LoggingConfig,
    /// Checkpoint lifetime settings.
    pub checkpoint: CheckpointConfig,
    /// Query memory settings.
    pub memory: MemoryConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Pool size.
    pub max_connections: u32,
    /// How long a writer waits on a locked database.
    pub busy_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Checkpoint lifetime and sweep cadence
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Default checkpoint TTL in seconds.
    pub ttl_secs: u64,
    /// Seconds between background sweeps.
    pub sweep_interval_secs: u64,
}

/// Query memory search defaults
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Result limit when a search names none.
    pub search_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/bichat.db".to_string()),
            ),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 5)?,
            busy_timeout_ms: parse_var("DATABASE_BUSY_TIMEOUT_MS", 5000)?,
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let checkpoint = CheckpointConfig {
            ttl_secs: parse_var("CHECKPOINT_TTL_SECS", CheckpointConfig::default().ttl_secs)?,
            sweep_interval_secs: parse_var(
                "CHECKPOINT_SWEEP_INTERVAL_SECS",
                CheckpointConfig::default().sweep_interval_secs,
            )?,
        };
        if checkpoint.ttl_secs == 0 {
            return Err(AppError::Config {
                message: "CHECKPOINT_TTL_SECS must be greater than zero".to_string(),
            });
        }
        if checkpoint_ttl(checkpoint.ttl_secs).is_none() {
            return Err(AppError::Config {
                message: format!("CHECKPOINT_TTL_SECS is out of range: {}", checkpoint.ttl_secs),
            });
        }

        let memory = MemoryConfig {
            search_limit: parse_var("MEMORY_SEARCH_LIMIT", MemoryConfig::default().search_limit)?,
        };

        Ok(Config {
            database,
            logging,
            checkpoint,
            memory,
        })
    }
}

fn checkpoint_ttl(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Read a numeric variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: {}", name, raw),
        }),
        Err(_) => Ok(default),
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/bichat.db"),
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { search_limit: 10 }
    }
}

impl CheckpointConfig {
    /// Default checkpoint time-to-live.
    ///
    /// Values too large for a duration saturate, so suspending with them
    /// fails validation instead of wrapping to a past expiry.
    pub fn ttl(&self) -> chrono::Duration {
        checkpoint_ttl(self.ttl_secs).unwrap_or(chrono::Duration::MAX)
    }

    /// Interval between background sweeps.
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
