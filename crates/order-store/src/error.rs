use std::time::Duration;

use sqlx::error::ErrorKind;
use thiserror::Error;

/// Errors that can occur when persisting an order.
///
/// Every variant is transient from the pipeline's point of view: the message
/// is left unacknowledged and the bus redelivers it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached or the connection broke mid-transaction.
    #[error("Connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// A database constraint other than the order identity rejected a row.
    #[error("Constraint violation on {}: {message}", .constraint.as_deref().unwrap_or("<unnamed>"))]
    ConstraintViolation {
        constraint: Option<String>,
        message: String,
    },

    /// The persistence attempt exceeded its deadline and was rolled back.
    #[error("Persistence timed out after {0:?}")]
    Timeout(Duration),

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Coarse classification of a [`StorageError`], used for log fields and
/// metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    ConnectivityFailure,
    ConstraintViolation,
    Timeout,
    Database,
    Migration,
}

impl StorageErrorKind {
    /// Returns a stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::ConnectivityFailure => "connectivity_failure",
            StorageErrorKind::ConstraintViolation => "constraint_violation",
            StorageErrorKind::Timeout => "timeout",
            StorageErrorKind::Database => "database",
            StorageErrorKind::Migration => "migration",
        }
    }
}

impl std::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StorageError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::ConnectivityFailure(_) => StorageErrorKind::ConnectivityFailure,
            StorageError::ConstraintViolation { .. } => StorageErrorKind::ConstraintViolation,
            StorageError::Timeout(_) => StorageErrorKind::Timeout,
            StorageError::Database(_) => StorageErrorKind::Database,
            StorageError::Migration(_) => StorageErrorKind::Migration,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => StorageError::ConnectivityFailure(err.to_string()),
            sqlx::Error::Database(db_err) => {
                // SQLSTATE class 08 is connection exception; 57P01 is admin shutdown
                let connection_lost = db_err
                    .code()
                    .is_some_and(|c| c.starts_with("08") || c == "57P01");
                if connection_lost {
                    return StorageError::ConnectivityFailure(err.to_string());
                }
                if matches!(db_err.kind(), ErrorKind::Other) {
                    return StorageError::Database(err);
                }
                StorageError::ConstraintViolation {
                    constraint: db_err.constraint().map(str::to_string),
                    message: db_err.message().to_string(),
                }
            }
            _ => StorageError::Database(err),
        }
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
