// src/errors.rs

//! Crate-wide error type, error classification and helpers.

use thiserror::Error;

use crate::types::JobStatus;

/// Classification of a failure, used by the retry policy and recorded on
/// failed Jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidTemplate,
    Materialization,
    Enumeration,
    Transfer,
    EngineUnavailable,
    Auth,
    Permission,
}

impl ErrorKind {
    /// Transient failures are retried; credential and permission problems
    /// will not fix themselves and are terminal.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Enumeration | ErrorKind::Transfer | ErrorKind::EngineUnavailable
        )
    }

    /// Parse the `error_kind` strings emitted by the copy engine.
    pub fn from_engine_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auth" | "authentication" => Some(ErrorKind::Auth),
            "permission" | "forbidden" => Some(ErrorKind::Permission),
            "network" | "connection" | "transfer" | "io" => Some(ErrorKind::Transfer),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum FerrymanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("Materialization error: {0}")]
    Materialization(String),

    #[error("Enumeration error: {0}")]
    Enumeration(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Copy engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("State store error: {0}")]
    Store(String),

    #[error("Job {job_id} is {actual:?}, expected {expected:?}")]
    StaleStatus {
        job_id: u64,
        expected: Vec<JobStatus>,
        actual: JobStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FerrymanError {
    pub fn invalid_template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        FerrymanError::InvalidTemplate {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Job-level classification of this error, if it has one.
    ///
    /// Anything that is not one of the documented kinds (IO, JSON, ...) while
    /// executing a Job is treated as a transfer failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FerrymanError::InvalidTemplate { .. } => ErrorKind::InvalidTemplate,
            FerrymanError::Materialization(_) => ErrorKind::Materialization,
            FerrymanError::Enumeration(_) => ErrorKind::Enumeration,
            FerrymanError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            FerrymanError::Auth(_) => ErrorKind::Auth,
            FerrymanError::Permission(_) => ErrorKind::Permission,
            _ => ErrorKind::Transfer,
        }
    }

    /// Only an unreachable/broken state store stops the orchestration loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FerrymanError::Store(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FerrymanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_permission_are_terminal() {
        assert!(!ErrorKind::Auth.is_retryable());
        assert!(!ErrorKind::Permission.is_retryable());
        assert!(ErrorKind::Transfer.is_retryable());
        assert!(ErrorKind::EngineUnavailable.is_retryable());
        assert!(ErrorKind::Enumeration.is_retryable());
    }

    #[test]
    fn engine_error_strings_are_classified() {
        assert_eq!(ErrorKind::from_engine_str("AUTH"), Some(ErrorKind::Auth));
        assert_eq!(ErrorKind::from_engine_str("network"), Some(ErrorKind::Transfer));
        assert_eq!(ErrorKind::from_engine_str("weird"), None);
    }

    #[test]
    fn io_errors_classify_as_transfer() {
        let err = FerrymanError::from(std::io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert!(!err.is_fatal());
        assert!(FerrymanError::Store("down".into()).is_fatal());
    }
}
