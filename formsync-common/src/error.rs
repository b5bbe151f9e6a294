//! Common error types for formsync

use thiserror::Error;

/// Common result type for formsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across formsync crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backing-store failure inside a bulk transaction.
    ///
    /// The transaction was rolled back; no partial state is visible.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite busy/lock errors that are worth retrying
    pub fn is_lock_contention(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_message() {
        let err = Error::Persistence("insert failed".to_string());
        assert_eq!(err.to_string(), "Persistence error: insert failed");
    }

    #[test]
    fn test_non_database_errors_are_not_lock_contention() {
        assert!(!Error::Internal("database is locked".to_string()).is_lock_contention());
        assert!(!Error::NotFound("task".to_string()).is_lock_contention());
    }
}
