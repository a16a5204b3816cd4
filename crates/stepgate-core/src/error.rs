use std::time::Duration;

use thiserror::Error;

/// Missing or invalid configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Failure reported by a [`crate::sink::Sink`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    /// The write was abandoned uncommitted because its deadline passed.
    #[error("deadline passed before {0} was committed")]
    DeadlineExceeded(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of the worker task's single durable write.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to write {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("write of {key} timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    #[error("failed to encode task record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of one orchestrated step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("step '{step}' rejected its input: {reason}")]
    InvalidInput { step: String, reason: String },
}

impl StepError {
    /// Storage failures and timeouts may succeed on another attempt.
    pub fn retryable(&self) -> bool {
        match self {
            StepError::Write(WriteError::Storage { .. } | WriteError::Timeout { .. }) => true,
            StepError::Write(WriteError::Encode(_)) | StepError::InvalidInput { .. } => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StepgateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StepgateError>;
