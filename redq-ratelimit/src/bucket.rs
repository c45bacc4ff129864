//! Token bucket stored as a Redis list
//!
//! The list length is the number of available tokens. Acquiring pops one
//! entry from the head; refilling pushes filler entries onto the tail,
//! never beyond capacity as observed by a preceding `LLEN`.
//!
//! The length check and the push are two commands. Two refills racing on
//! the same key can both see the same length and together overshoot
//! capacity.
//!
//! ## Example
//!
//! ```rust,ignore
//! use redq_ratelimit::{BucketConfig, RedisTokenBucket, TokenBucket};
//!
//! let bucket = RedisTokenBucket::new(client, BucketConfig::new("sms", 10)?);
//! bucket.reset().await?;
//!
//! if bucket.acquire().await? {
//!     send_sms().await;
//! }
//! ```

use async_trait::async_trait;
use redq_redis::{Command, Connector, ResilientClient, TcpConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::BucketConfig;
use crate::error::{RateLimitError, RateLimitResult};

/// Value pushed for each token.
const TOKEN: &str = "1";

/// Capacity-bounded pool of permits.
#[async_trait]
pub trait TokenBucket: Send + Sync {
    /// Take one token. `false` means the bucket is empty; try later.
    async fn acquire(&self) -> RateLimitResult<bool>;

    /// Add up to `count` tokens without exceeding capacity.
    ///
    /// Returns how many were added.
    async fn add_tokens(&self, count: i64) -> RateLimitResult<u64>;

    /// Top the bucket up to capacity.
    async fn reset(&self) -> RateLimitResult<u64> {
        let capacity = i64::try_from(self.capacity()).unwrap_or(i64::MAX);
        self.add_tokens(capacity).await
    }

    /// Tokens currently available. Stale as soon as it is read.
    async fn length(&self) -> RateLimitResult<u64>;

    /// Maximum tokens.
    fn capacity(&self) -> u64;
}

/// [`TokenBucket`] backed by a Redis list.
pub struct RedisTokenBucket<C: Connector = TcpConnector> {
    client: Arc<ResilientClient<C>>,
    config: BucketConfig,
}

impl<C: Connector> RedisTokenBucket<C> {
    /// Create a bucket.
    pub fn new(client: Arc<ResilientClient<C>>, config: BucketConfig) -> Self {
        Self { client, config }
    }

    /// Bucket key.
    pub fn key(&self) -> &str {
        &self.config.key
    }

    /// Bucket configuration.
    pub fn config(&self) -> &BucketConfig {
        &self.config
    }

    /// Run `add_tokens(amount)` every `interval` until the bucket is dropped.
    pub fn spawn_refill(self: &Arc<Self>, interval: Duration, amount: i64) -> JoinHandle<()> {
        let bucket = Arc::downgrade(self);
        let key = self.config.key.clone();
        let period = interval.max(Duration::from_millis(1));

        debug!(key = %key, interval = ?period, amount, "Starting token bucket refill");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(bucket) = bucket.upgrade() else {
                    debug!(key = %key, "Token bucket refill stopped");
                    break;
                };
                if let Err(e) = bucket.add_tokens(amount).await {
                    warn!(key = %key, error = %e, "Token bucket refill failed");
                }
            }
        })
    }
}

#[async_trait]
impl<C: Connector> TokenBucket for RedisTokenBucket<C> {
    async fn acquire(&self) -> RateLimitResult<bool> {
        let token = self.client.lpop(&self.config.key).await?;
        trace!(key = %self.config.key, granted = token.is_some(), "Token bucket acquire");
        Ok(token.is_some())
    }

    async fn add_tokens(&self, count: i64) -> RateLimitResult<u64> {
        let requested = u64::try_from(count).unwrap_or(0);
        let current = self.length().await?;
        let room = self.config.capacity.saturating_sub(current);
        let count = requested.min(room);

        if count > 0 {
            let command = (0..count).fold(Command::new("RPUSH").key(&self.config.key), |cmd, _| {
                cmd.arg(TOKEN)
            });
            self.client.execute(command).await?;
        }

        trace!(key = %self.config.key, requested, added = count, "Token bucket refill");
        Ok(count)
    }

    async fn length(&self) -> RateLimitResult<u64> {
        let len = self.client.llen(&self.config.key).await?;
        u64::try_from(len).map_err(|_| RateLimitError::store(format!("negative LLEN reply {}", len)))
    }

    fn capacity(&self) -> u64 {
        self.config.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redq_redis::{ConnectionConfig, MemoryConnector};

    async fn bucket(capacity: u64) -> (RedisTokenBucket<MemoryConnector>, MemoryConnector) {
        let connector = MemoryConnector::new();
        let client = ResilientClient::connect("default", ConnectionConfig::default(), connector.clone())
            .await
            .unwrap();
        let config = BucketConfig::new("bucket:sms", capacity).unwrap();
        (RedisTokenBucket::new(Arc::new(client), config), connector)
    }

    #[tokio::test]
    async fn test_capacity_clamp() {
        let (bucket, _) = bucket(10).await;

        assert_eq!(bucket.add_tokens(15).await.unwrap(), 10);
        assert_eq!(bucket.add_tokens(5).await.unwrap(), 0);
        assert_eq!(bucket.length().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_acquire_until_empty() {
        let (bucket, _) = bucket(10).await;
        bucket.add_tokens(15).await.unwrap();

        for _ in 0..10 {
            assert!(bucket.acquire().await.unwrap());
        }
        assert!(!bucket.acquire().await.unwrap());
        assert_eq!(bucket.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_restores_capacity() {
        let (bucket, _) = bucket(10).await;
        bucket.add_tokens(4).await.unwrap();
        bucket.acquire().await.unwrap();

        assert_eq!(bucket.reset().await.unwrap(), 7);
        assert_eq!(bucket.length().await.unwrap(), 10);
        assert_eq!(bucket.reset().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_negative_count_adds_nothing() {
        let (bucket, _) = bucket(3).await;
        assert_eq!(bucket.add_tokens(-4).await.unwrap(), 0);
        assert_eq!(bucket.length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acquire_survives_reconnect() {
        let (bucket, connector) = bucket(2).await;
        bucket.reset().await.unwrap();

        connector.fail_next(1, "connection lost");
        assert!(bucket.acquire().await.unwrap());
        assert_eq!(bucket.length().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_refill() {
        let (bucket, _) = bucket(5).await;
        let bucket = Arc::new(bucket);

        let handle = bucket.spawn_refill(Duration::from_secs(1), 2);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(bucket.length().await.unwrap(), 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bucket.length().await.unwrap(), 5);

        drop(bucket);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.is_finished());
    }
}
