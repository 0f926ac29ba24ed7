use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Storage and domain errors surfaced by the engine.
///
/// Not-found, conflict, expiry and state errors are typed so the
/// conversational layer can decide whether to retry, ask again or abort.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Thread already suspended: {thread_id}")]
    AlreadySuspended { thread_id: String },

    #[error("Checkpoint expired: {checkpoint_id}")]
    Expired { checkpoint_id: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl StorageError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StorageError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        StorageError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the requested row does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Whether this error is a uniqueness conflict of any kind.
    pub fn is_conflict(&self) -> bool {
        match self {
            StorageError::Conflict { .. } | StorageError::AlreadySuspended { .. } => true,
            StorageError::Sqlx(e) => is_unique_violation(e),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Returns true when the database rejected a write because of a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

/// Returns true when a UNIQUE violation names `column`, given as `table.column`.
pub(crate) fn is_unique_violation_on(err: &sqlx::Error, column: &str) -> bool {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => db
            .message()
            .split_once(": ")
            .map(|(_, columns)| columns.split(',').any(|c| c.trim() == column))
            .unwrap_or(false),
        _ => false,
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");

        let err = AppError::Internal {
            message: "unexpected".to_string(),
        };
        assert_eq!(err.to_string(), "Internal error: unexpected");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::not_found("Session", "sess-123");
        assert_eq!(err.to_string(), "Session not found: sess-123");

        let err = StorageError::AlreadySuspended {
            thread_id: "T1".to_string(),
        };
        assert_eq!(err.to_string(), "Thread already suspended: T1");

        let err = StorageError::Expired {
            checkpoint_id: "cp-1".to_string(),
        };
        assert_eq!(err.to_string(), "Checkpoint expired: cp-1");

        let err = StorageError::validation("tenant_id", "must not be nil");
        assert_eq!(err.to_string(), "Validation failed: tenant_id - must not be nil");
    }

    #[test]
    fn test_conflict_classification() {
        assert!(StorageError::Conflict {
            message: "dup".to_string()
        }
        .is_conflict());
        assert!(StorageError::AlreadySuspended {
            thread_id: "T1".to_string()
        }
        .is_conflict());
        assert!(!StorageError::not_found("Artifact", "a").is_conflict());
        assert!(!StorageError::Sqlx(sqlx::Error::RowNotFound).is_conflict());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(StorageError::not_found("Checkpoint", "x").is_not_found());
        assert!(!StorageError::InvalidState {
            message: "archived".to_string()
        }
        .is_not_found());
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::not_found("Session", "test-123");
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
