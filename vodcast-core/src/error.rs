use thiserror::Error;

use crate::control_plane::ControlPlaneError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Media control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("Timed out waiting for lock: {0}")]
    LockTimeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Operational failures that a later reconciliation pass can recover from.
    ///
    /// Everything else (bad input, invalid state, store failures) points at a
    /// bug or a misconfiguration and is surfaced to the caller as-is.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ControlPlane(e) => e.is_transient(),
            Self::LockTimeout(_) => true,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            // Map "no rows" to NotFound
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => {
                        let detail = db_err.message().to_string();
                        if detail.contains("room_name") {
                            Self::AlreadyExists("Room name already taken".to_string())
                        } else {
                            Self::AlreadyExists("Resource already exists".to_string())
                        }
                    }
                    // PostgreSQL foreign_key_violation
                    "23503" => Self::NotFound("Referenced resource not found".to_string()),
                    // PostgreSQL check_violation
                    "23514" => Self::InvalidInput("Constraint check failed".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Self::InvalidInput("Required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::ControlPlane(ControlPlaneError::Timeout(Duration::from_secs(1))).is_transient());
        assert!(Error::ControlPlane(ControlPlaneError::Transport("reset".to_string())).is_transient());
        assert!(!Error::ControlPlane(ControlPlaneError::NotFound("x".to_string())).is_transient());
        assert!(!Error::InvalidInput("bad".to_string()).is_transient());
        assert!(!Error::InvalidState("on demand".to_string()).is_transient());
    }
}
