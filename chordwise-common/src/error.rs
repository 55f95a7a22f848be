//! Common error types for Chordwise

use thiserror::Error;

/// Common result type for Chordwise operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Chordwise services
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (job id, source reference, session id); rejected
    /// before any state is created
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, invalid, expired, or revoked credential
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Resource exists but does not belong to the requesting identity
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Derivation pipeline failure; recorded on the job, never retried
    /// automatically
    #[error("Downstream error: {0}")]
    Downstream(String),

    /// Cache or store temporarily unavailable; swallowed only where an
    /// explicit fallback exists
    #[error("Transient infrastructure error: {0}")]
    Transient(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the structured `error` wire event
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Authentication(_) => "AUTHENTICATION_ERROR",
            Error::Authorization(_) => "AUTHORIZATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Downstream(_) => "DOWNSTREAM_ERROR",
            Error::Transient(_) => "TRANSIENT_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(
            Error::Authentication("x".into()).code(),
            "AUTHENTICATION_ERROR"
        );
        assert_eq!(
            Error::Authorization("x".into()).code(),
            "AUTHORIZATION_ERROR"
        );
        assert_eq!(Error::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::Downstream("x".into()).code(), "DOWNSTREAM_ERROR");
    }

    #[test]
    fn test_display_includes_detail() {
        let err = Error::NotFound("job_123".to_string());
        assert_eq!(err.to_string(), "Not found: job_123");
    }
}
