//! Error types for the lending core

use thiserror::Error;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Business-rule violation: limits, duplicates, unavailability, or a
    /// concurrent state race. Terminal for the request; never retried.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No such transaction, or the transaction is not in the state the
    /// requested action requires.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The request is illegal in the current state, e.g. a renewal outside
    /// the allowed window.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No lending store can service the request.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for infrastructure failures that may justify a one-time read
    /// fallback to the secondary store.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::BackendUnavailable(_)
        )
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
