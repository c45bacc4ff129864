//! Token bucket against a real Redis server (needs Docker).

use redq_ratelimit::*;
use redq_redis::{ConnectionConfig, ResilientClient};
use std::sync::Arc;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

async fn start_redis() -> (ContainerAsync<Redis>, Arc<ResilientClient>) {
    let container = Redis::default()
        .with_tag("8-alpine")
        .start()
        .await
        .expect("Failed to start Redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get Redis port");

    let config = ConnectionConfig::new(format!("redis://127.0.0.1:{}", port));
    let client = ResilientClient::open("limits", config)
        .await
        .expect("Failed to connect to Redis");

    (container, Arc::new(client))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_capacity_acquire_reset() {
    let (_redis, client) = start_redis().await;
    let bucket = RedisTokenBucket::new(client.clone(), BucketConfig::new("sms", 10).unwrap());

    assert_eq!(bucket.add_tokens(15).await.unwrap(), 10);
    assert_eq!(bucket.add_tokens(5).await.unwrap(), 0);

    for _ in 0..10 {
        assert!(bucket.acquire().await.unwrap());
    }
    assert!(!bucket.acquire().await.unwrap());

    bucket.add_tokens(3).await.unwrap();
    assert_eq!(bucket.reset().await.unwrap(), 7);
    assert_eq!(bucket.length().await.unwrap(), 10);
    assert_eq!(client.llen("sms").await.unwrap(), 10);
}
