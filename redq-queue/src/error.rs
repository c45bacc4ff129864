//! Error types for queue operations.

use redq_redis::RedisError;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A job descriptor failed producer-side validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// A dequeued payload could not be turned into a call
    #[error("Malformed job: {0}")]
    MalformedJob(String),

    /// Job execution failed
    #[error("Job execution failed: {0}")]
    ExecutionFailed(String),

    /// Worker not running
    #[error("Worker not running")]
    WorkerNotRunning,

    /// Worker already running
    #[error("Worker already running")]
    WorkerAlreadyRunning,
}

impl QueueError {
    /// Create an execution failure from any displayable error.
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::ExecutionFailed(reason.to_string())
    }

    /// Whether the worker should drop the job instead of retrying it.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedJob(_) | Self::Deserialization(_))
    }
}
