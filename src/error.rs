//! Error types for the Slack knowledge pipeline

use thiserror::Error;

/// Formats accepted by identity reference validation.
pub const IDENTITY_FORMATS: &str =
    "<@U123ABC>, U123ABC / S123ABC, @display.name or display-name (letters, digits, '.', '-', '_')";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Malformed identity reference '{reference}': expected one of {IDENTITY_FORMATS}")]
    MalformedIdentityReference { reference: String },

    #[error("Another run is already in progress")]
    RunLocked,

    #[error("Failed to acquire run lock: {0}")]
    LockError(String),

    #[error("Slack API error: {0}")]
    SlackError(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("LLM API error: {0}")]
    LlmError(String),

    #[error("LLM rejected the request: {0}")]
    LlmRejected(String),

    #[error("LLM response failed validation: {0}")]
    ResponseValidation(String),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<Error>,
    },

    #[error("MySQL error: {0}")]
    MySqlError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Migration {version} failed: {reason}")]
    MigrationError { version: u32, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Errors caused by user input rather than the environment.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRange(_)
                | Error::MalformedIdentityReference { .. }
                | Error::InvalidArgument(_)
        )
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LlmError(_) | Error::ResponseValidation(_) | Error::ConnectionError(_)
        )
    }
}

impl From<mysql_async::Error> for Error {
    fn from(err: mysql_async::Error) -> Self {
        Error::MySqlError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::ConnectionError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_invalid_range() {
        let err = Error::InvalidRange("start date '2024-13-01' is not a valid date".to_string());
        assert!(err.to_string().contains("Invalid date range"));
        assert!(err.to_string().contains("start date"));
    }

    #[test]
    fn test_error_display_malformed_identity_lists_formats() {
        let err = Error::MalformedIdentityReference {
            reference: "bad name!".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bad name!"));
        assert!(msg.contains("<@U123ABC>"));
        assert!(msg.contains("@display.name"));
    }

    #[test]
    fn test_error_display_retry_exhausted() {
        let err = Error::RetryExhausted {
            attempts: 4,
            last_error: Box::new(Error::LlmError("rate limited".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_error_display_run_locked() {
        let err = Error::RunLocked;
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn test_error_display_migration() {
        let err = Error::MigrationError {
            version: 2,
            reason: "table exists".to_string(),
        };
        assert_eq!(err.to_string(), "Migration 2 failed: table exists");
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn usage_errors_are_classified() {
        assert!(Error::InvalidRange("x".into()).is_usage_error());
        assert!(Error::MalformedIdentityReference {
            reference: "x y".into()
        }
        .is_usage_error());
        assert!(!Error::SlackError("x".into()).is_usage_error());
    }

    #[test]
    fn retryable_errors_are_classified() {
        assert!(Error::LlmError("503".into()).is_retryable());
        assert!(Error::ResponseValidation("no topics".into()).is_retryable());
        assert!(!Error::InvalidRange("x".into()).is_retryable());
        assert!(!Error::ConfigError("x".into()).is_retryable());
    }
}
