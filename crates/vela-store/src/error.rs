//! # Store Error Types
//!
//! Errors for local persistence operations.

use thiserror::Error;

use vela_core::{CoreError, EntityKind};

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store error type covering pool, migration and query failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to open or connect to the database.
    #[error("Failed to open local store: {0}")]
    ConnectionFailed(String),

    /// Database migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A query failed.
    #[error("Database error: {0}")]
    Query(#[from] sqlx::Error),

    /// An entity was cached or queued without an id.
    #[error("Cannot store {kind} entity without an '_id' field")]
    MissingEntityId { kind: EntityKind },

    /// A persisted row no longer parses (schema drift or manual edits).
    #[error("Corrupt row '{id}': {reason}")]
    CorruptRow { id: String, reason: String },

    /// A payload failed domain-level validation or parsing.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_id_display() {
        let err = StoreError::MissingEntityId {
            kind: EntityKind::Billings,
        };
        assert!(err.to_string().contains("billings"));
    }
}
