//! Error handling module for the donation backend.
//!
//! Provides the error taxonomy shared by the stores, the collaborators and the
//! lifecycle coordinator, plus a serializable structured form for callers.

use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const AUTHORIZATION_ERROR: &str = "AUTHORIZATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const DEPENDENCY_ERROR: &str = "DEPENDENCY_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// SQLite primary result codes that signal a concurrent writer.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Application error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Referenced user, form, dish or queue entry does not exist
    NotFound(String),
    /// Missing or malformed input
    Validation(String),
    /// Caller identity or role does not permit the action
    Authorization(String),
    /// Concurrent modification detected; the caller should retry
    Conflict(String),
    /// Object store or push gateway failure
    Dependency(String),
    /// Database error
    Database(String),
    /// Internal error (invariant breach, bad configuration)
    Internal(String),
}

impl AppError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Authorization(_) => codes::AUTHORIZATION_ERROR,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::Dependency(_) => codes::DEPENDENCY_ERROR,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::Authorization(msg)
            | AppError::Conflict(msg)
            | AppError::Dependency(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg) => msg,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().is_some_and(|code| is_write_conflict_code(&code)) {
                tracing::warn!("Write conflict reported by database: {}", db_err.message());
                return AppError::Conflict(
                    "Concurrent modification detected, please retry".to_string(),
                );
            }
        }
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::Database(format!("Stored JSON could not be processed: {}", err))
    }
}

/// Whether an SQLite (extended) result code reports a busy or locked database.
///
/// Extended codes such as `SQLITE_BUSY_SNAPSHOT` (517) carry the primary code
/// in their low byte.
pub(crate) fn is_write_conflict_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|extended| matches!(extended & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

/// Structured error handed back to callers of the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    pub retry: bool,
}

impl From<&AppError> for ErrorDetails {
    fn from(error: &AppError) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.message().to_string(),
            retry: error.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_and_locked_codes_are_conflicts() {
        assert!(is_write_conflict_code("5"));
        assert!(is_write_conflict_code("6"));
        assert!(is_write_conflict_code("517"));
        assert!(is_write_conflict_code("261"));
    }

    #[test]
    fn test_other_codes_are_not_conflicts() {
        assert!(!is_write_conflict_code("19"));
        assert!(!is_write_conflict_code("1555"));
        assert!(!is_write_conflict_code("not-a-code"));
    }

    #[test]
    fn test_error_details_carry_retry_flag() {
        let conflict = ErrorDetails::from(&AppError::Conflict("busy".to_string()));
        assert_eq!(conflict.code, codes::CONFLICT);
        assert!(conflict.retry);

        let missing = ErrorDetails::from(&AppError::NotFound("gone".to_string()));
        assert_eq!(missing.code, codes::NOT_FOUND);
        assert_eq!(missing.message, "gone");
        assert!(!missing.retry);
    }

    #[test]
    fn test_display_includes_code() {
        let err = AppError::Authorization("not the assigned volunteer".to_string());
        assert_eq!(
            err.to_string(),
            "AUTHORIZATION_ERROR: not the assigned volunteer"
        );
    }
}
