//! Redis error types.

use thiserror::Error;

/// Result type for Redis operations.
pub type Result<T> = std::result::Result<T, RedisError>;

/// Redis errors.
#[derive(Debug, Error)]
pub enum RedisError {
    /// Connect, authenticate or select failed, or the link dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connect timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The server rejected a command or replied with an unexpected type.
    #[error("Command error: {0}")]
    Command(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Underlying Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl RedisError {
    /// Check if this error means the connection is dead and a reconnect
    /// is worth one retry.
    ///
    /// Matches "connection lost" (any case) or any message where the peer
    /// "went away".
    pub fn is_connection_lost(&self) -> bool {
        let message = match self {
            Self::Connection(msg) | Self::Command(msg) => msg.to_lowercase(),
            Self::Redis(err) => {
                if err.is_connection_dropped() {
                    return true;
                }
                err.to_string().to_lowercase()
            }
            _ => return false,
        };
        message.contains("connection lost") || message.contains("went away")
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout) || self.is_connection_lost()
    }

    /// Check if this error is a connection-level failure.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Auth(_) | Self::Timeout)
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_detection() {
        assert!(RedisError::Connection("Connection lost".into()).is_connection_lost());
        assert!(RedisError::Connection("CONNECTION LOST".into()).is_connection_lost());
        assert!(RedisError::Command("Redis server went away".into()).is_connection_lost());
        assert!(RedisError::Connection("read error: server went away".into()).is_connection_lost());
    }

    #[test]
    fn test_other_errors_are_not_connection_lost() {
        assert!(!RedisError::Command("WRONGTYPE Operation".into()).is_connection_lost());
        assert!(!RedisError::Connection("connection refused".into()).is_connection_lost());
        assert!(!RedisError::Config("missing".into()).is_connection_lost());
        assert!(!RedisError::Timeout.is_connection_lost());
    }

    #[test]
    fn test_retryable() {
        assert!(RedisError::Timeout.is_retryable());
        assert!(RedisError::Connection("connection lost".into()).is_retryable());
        assert!(!RedisError::Auth("bad password".into()).is_retryable());
    }

    #[test]
    fn test_connection_error_classification() {
        assert!(RedisError::Auth("denied".into()).is_connection_error());
        assert!(RedisError::Timeout.is_connection_error());
        assert!(!RedisError::Config("x".into()).is_connection_error());
    }
}
