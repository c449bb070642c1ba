use quorum_db::DbError;
use thiserror::Error;

/// Engine-level failure taxonomy. Callers surface `Validation` next to
/// the offending input field, `Conflict` as "you can't do that right
/// now", and treat `NotFound` as a terminal no-op rather than a retry.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl CoreError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field,
            message: message.into(),
        }
    }
}
