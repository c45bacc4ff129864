//! Error types for rate limiting

use redq_redis::RedisError;
use thiserror::Error;

/// Result type for rate limiting operations
pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Rate limiting errors
///
/// An empty bucket is not an error; [`acquire`](crate::TokenBucket::acquire)
/// returns `false`.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Store error (unexpected reply, etc.)
    #[error("Rate limit store error: {0}")]
    StoreError(String),

    /// Configuration error
    #[error("Rate limit configuration error: {0}")]
    ConfigError(String),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),
}

impl RateLimitError {
    /// Create a new store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::StoreError(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }
}
