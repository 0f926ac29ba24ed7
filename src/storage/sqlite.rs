use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::TenantStore;
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::tenancy::TenantId;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Tables holding tenant rows, children before parents.
const TENANT_TABLES: &[&str] = &[
    "trace_events",
    "spans",
    "generations",
    "traces",
    "artifact_provider_files",
    "artifacts",
    "checkpoints",
    "messages",
    "learnings",
    "validated_queries",
    "sessions",
];

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pub(super) pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                    message: format!("Failed to create database directory: {}", e),
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        debug!(path = %config.path.display(), "Connected to SQLite database");

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create a private in-memory database, mainly for tests.
    ///
    /// The pool holds exactly one connection that never expires, since each
    /// in-memory connection is its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    pub async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TenantStore for SqliteStorage {
    async fn purge_tenant(&self, tenant: TenantId) -> StorageResult<u64> {
        let tenant_id = tenant.to_string();
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for table in TENANT_TABLES {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE tenant_id = ?", table))
                .bind(&tenant_id)
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected();
        }

        tx.commit().await?;

        info!(tenant = %tenant, rows = removed, "Purged tenant");
        Ok(removed)
    }
}

// Column encoding shared by the per-concern implementations.

/// Fixed-width UTC timestamp; lexical order equals temporal order.
pub(super) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(super) fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Serialization {
            message: format!("invalid timestamp {:?}: {}", raw, e),
        })
}

pub(super) fn parse_optional_timestamp(
    raw: Option<String>,
) -> StorageResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_timestamp).transpose()
}

pub(super) fn encode_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub(super) fn decode_json<T: DeserializeOwned>(raw: &str) -> StorageResult<T> {
    Ok(serde_json::from_str(raw)?)
}

pub(super) fn decode_optional_json<T: DeserializeOwned>(
    raw: Option<String>,
) -> StorageResult<Option<T>> {
    raw.as_deref().map(decode_json).transpose()
}

pub(super) fn decode_enum<T>(column: &str, raw: &str) -> StorageResult<T>
where
    T: FromStr<Err = String>,
{
    raw.parse().map_err(|e: String| StorageError::Serialization {
        message: format!("{}: {}", column, e),
    })
}

pub(super) fn decode_tenant(raw: &str) -> StorageResult<TenantId> {
    raw.parse().map_err(|_| StorageError::Serialization {
        message: format!("tenant_id: invalid value {}", raw),
    })
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(super) fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Turn free text into an FTS5 query matching any of its words.
///
/// Each word is quoted so FTS5 operators in user input are taken literally.
/// Returns `None` when the text has no searchable word.
pub(super) fn fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| format!("\"{}\"", w.to_lowercase()))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_is_fixed_width_and_sortable() {
        let a = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::microseconds(1);
        let (fa, fb) = (format_timestamp(a), format_timestamp(b));
        assert_eq!(fa, "2025-01-02T03:04:05.000000Z");
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }

    #[test]
    fn test_corrupt_timestamp_is_rejected() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(
            matches!(err, StorageError::Serialization { ref message } if message.contains("yesterday"))
        );
        assert_eq!(parse_optional_timestamp(None).unwrap(), None);
        assert!(parse_optional_timestamp(Some("".to_string())).is_err());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a_b%"), "%a\\_b\\%%");
        assert_eq!(like_pattern("ok"), "%ok%");
    }

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("revenue by-region").as_deref(),
            Some("\"revenue\" OR \"by\" OR \"region\"")
        );
        assert_eq!(fts_query("\"*) OR"), Some("\"or\"".to_string()));
        assert!(fts_query("  --  ").is_none());
    }

    #[test]
    fn test_decode_enum_reports_column() {
        let err = decode_enum::<crate::domain::SessionStatus>("status", "gone").unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[tokio::test]
    async fn test_in_memory_storage_migrates() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'checkpoints'",
        )
        .fetch_one(storage.pool())
        .await
        .unwrap();
        assert_eq!(count.0, 1);
    }
}
