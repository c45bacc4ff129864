//! Token bucket configuration

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, RateLimitResult};

/// Default bucket capacity.
pub const DEFAULT_CAPACITY: u64 = 10;

/// Configuration for one bucket.
///
/// Deserializing runs the same checks as [`BucketConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBucketConfig")]
pub struct BucketConfig {
    /// List key holding the tokens. Used as-is.
    pub key: String,
    /// Maximum tokens in the bucket
    pub capacity: u64,
}

#[derive(Deserialize)]
struct RawBucketConfig {
    key: String,
    #[serde(default = "default_capacity")]
    capacity: u64,
}

fn default_capacity() -> u64 {
    DEFAULT_CAPACITY
}

impl TryFrom<RawBucketConfig> for BucketConfig {
    type Error = RateLimitError;

    fn try_from(raw: RawBucketConfig) -> RateLimitResult<Self> {
        Self::new(raw.key, raw.capacity)
    }
}

impl BucketConfig {
    /// Create a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or the capacity is 0.
    pub fn new(key: impl Into<String>, capacity: u64) -> RateLimitResult<Self> {
        let config = Self {
            key: key.into(),
            capacity,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration.
    pub fn validate(&self) -> RateLimitResult<()> {
        if self.key.is_empty() {
            return Err(RateLimitError::config("bucket key is empty"));
        }
        if self.capacity == 0 {
            return Err(RateLimitError::config("capacity must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(BucketConfig::new("api", 5).is_ok());
        assert!(BucketConfig::new("", 5).is_err());
        assert!(matches!(
            BucketConfig::new("api", 0),
            Err(RateLimitError::ConfigError(_))
        ));
    }

    #[test]
    fn test_deserialize_default_capacity() {
        let config: BucketConfig = serde_json::from_str(r#"{"key": "sms"}"#).unwrap();
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let zero = serde_json::from_str::<BucketConfig>(r#"{"key": "sms", "capacity": 0}"#);
        assert!(zero.unwrap_err().to_string().contains("capacity"));

        assert!(serde_json::from_str::<BucketConfig>(r#"{"key": ""}"#).is_err());
    }
}
