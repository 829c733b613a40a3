//! Error types for the institutions directory.
//!
//! Every fallible operation in the crate returns [`Result`]. Storage errors are
//! converted at the rusqlite boundary so callers can tell a lock conflict
//! (retry the whole write) from a permanent failure.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the directory.
#[derive(Debug, Error)]
pub enum MedinstError {
    // Boundary validation
    #[error("Invalid institution type: {value}")]
    InvalidCategory { value: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Index maintenance
    #[error("Failed to derive search index from {field}: {message}")]
    DerivationFailure { field: String, message: String },

    // Storage errors
    #[error("Institution not found: {id}")]
    InstitutionNotFound { id: i64 },

    #[error("Concurrent write conflict: {message}")]
    ConcurrentWriteConflict { message: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for directory operations.
pub type Result<T> = std::result::Result<T, MedinstError>;

impl From<std::io::Error> for MedinstError {
    fn from(err: std::io::Error) -> Self {
        MedinstError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MedinstError {
    fn from(err: serde_json::Error) -> Self {
        MedinstError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for MedinstError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                MedinstError::ConcurrentWriteConflict {
                    message: err.to_string(),
                }
            }
            _ => MedinstError::Database {
                message: err.to_string(),
                source: Some(err),
            },
        }
    }
}

impl MedinstError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MedinstError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Error returned when the connection mutex is poisoned.
    pub(crate) fn lock_poisoned() -> Self {
        MedinstError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        }
    }

    /// Check if the caller should retry the whole write.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MedinstError::ConcurrentWriteConflict { .. })
    }
}
