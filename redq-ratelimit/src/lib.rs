//! # redq Rate Limit
//!
//! A token bucket kept in Redis, shared by every process that uses the
//! same key.
//!
//! Tokens are list entries rather than a counter: `acquire` pops one,
//! `add_tokens` pushes up to the remaining capacity and `reset` tops the
//! bucket up. Refill cadence is up to the caller; [`RedisTokenBucket::spawn_refill`]
//! runs the classic refill tick on the tokio runtime.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redq_ratelimit::{BucketConfig, RedisTokenBucket, TokenBucket};
//! use redq_redis::{ConnectionConfig, ConnectionRegistry, RegistryConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ConnectionRegistry::new(
//!         RegistryConfig::new().with_connection("default", ConnectionConfig::from_env().build()),
//!     );
//!     let client = registry.connection("default").await?;
//!
//!     let bucket = Arc::new(RedisTokenBucket::new(client, BucketConfig::new("sms", 10)?));
//!     bucket.reset().await?;
//!     let _refill = bucket.spawn_refill(Duration::from_secs(1), 1);
//!
//!     if bucket.acquire().await? {
//!         // perform the rate-limited action
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bucket;
pub mod config;
pub mod error;

pub use bucket::{RedisTokenBucket, TokenBucket};
pub use config::{BucketConfig, DEFAULT_CAPACITY};
pub use error::{RateLimitError, RateLimitResult};

/// Prelude for common imports
pub mod prelude {
    pub use crate::bucket::{RedisTokenBucket, TokenBucket};
    pub use crate::config::BucketConfig;
    pub use crate::error::{RateLimitError, RateLimitResult};
}
