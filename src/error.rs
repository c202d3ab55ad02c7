//! Error types for trackdeck.
//!
//! Every fallible operation returns [`StoreError`]. The variants are the
//! failure taxonomy callers are expected to match on; of these only
//! [`StoreError::StorageBusy`] is transient and worth retrying.

use thiserror::Error;

/// Errors that can occur in the trackdeck storage layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A write violated a uniqueness, reference, or check constraint.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// The store is locked by a competing writer. Transient; safe to
    /// retry.
    #[error("Store busy: {0}")]
    StorageBusy(String),

    /// The store failed its integrity verification.
    #[error("Integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// A migration stage failed and was rolled back.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data could not be serialized or deserialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File system error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether the operation may succeed if simply retried.
    ///
    /// Only contention is transient; every other variant reflects a
    /// state that a retry cannot change.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageBusy(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("Row".to_string()),
            rusqlite::Error::SqliteFailure(inner, detail) => {
                let detail = detail
                    .clone()
                    .unwrap_or_else(|| inner.to_string());
                match inner.code {
                    rusqlite::ErrorCode::ConstraintViolation => Self::ConstraintViolation(detail),
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        Self::StorageBusy(detail)
                    }
                    rusqlite::ErrorCode::DatabaseCorrupt => Self::IntegrityCheckFailed(detail),
                    _ => Self::Database(e.to_string()),
                }
            }
            _ => Self::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(StoreError::StorageBusy("locked".to_string()).is_retryable());
        assert!(!StoreError::NotFound("Profile 'x'".to_string()).is_retryable());
        assert!(!StoreError::MigrationFailed("stage".to_string()).is_retryable());
        assert!(!StoreError::IntegrityCheckFailed("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_sqlite_busy_classifies_as_storage_busy() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(matches!(err, StoreError::StorageBusy(_)));

        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED));
        assert!(matches!(err, StoreError::StorageBusy(_)));
    }

    #[test]
    fn test_sqlite_constraint_classifies() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[test]
    fn test_sqlite_corrupt_classifies() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_CORRUPT));
        assert!(matches!(err, StoreError::IntegrityCheckFailed(_)));
    }

    #[test]
    fn test_no_rows_is_not_found() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
