//! Client and cache helpers against a real Redis server (needs Docker).

use redq_redis::*;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

async fn start_redis() -> (ContainerAsync<Redis>, String) {
    let container = Redis::default()
        .with_tag("8-alpine")
        .start()
        .await
        .expect("Failed to start Redis container");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get Redis port");

    (container, format!("redis://127.0.0.1:{}", port))
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_prefix_and_database_selection() {
    let (_redis, host) = start_redis().await;
    let config = RegistryConfig::new()
        .with_connection("default", ConnectionConfig::new(host.clone()))
        .with_connection(
            "isolated",
            ConnectionConfig::builder()
                .host(host)
                .database(3)
                .prefix("iso:")
                .build(),
        );
    let registry = ConnectionRegistry::new(config);

    let isolated = registry.connection("isolated").await.unwrap();
    isolated.rpush("jobs", &["x"]).await.unwrap();

    let default = registry.default_connection().await.unwrap();
    assert!(!default.exists("iso:jobs").await.unwrap());

    let raw = ResilientClient::open(
        "raw",
        ConnectionConfig::builder()
            .host(isolated.config().host.clone())
            .database(3)
            .build(),
    )
    .await
    .unwrap();
    assert_eq!(raw.lpop("iso:jobs").await.unwrap().as_deref(), Some("x"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_sorted_set_and_hash_helpers() {
    let (_redis, host) = start_redis().await;
    let client = ResilientClient::open("default", ConnectionConfig::new(host))
        .await
        .unwrap();

    client.zadd("delayed", 1_060, "a").await.unwrap();
    client.zadd("delayed", 1_000, "b").await.unwrap();
    assert_eq!(
        client.zrangebyscore("delayed", "-inf", "1060").await.unwrap(),
        vec!["b".to_string(), "a".to_string()]
    );
    assert_eq!(client.zscore("delayed", "a").await.unwrap(), Some(1_060));
    assert_eq!(client.zrem("delayed", "a").await.unwrap(), 1);
    assert_eq!(client.zcard("delayed").await.unwrap(), 1);

    client.hset("users", "1", "ann").await.unwrap();
    assert_eq!(
        client.hmget("users", &["1", "2"]).await.unwrap(),
        vec![Some("ann".to_string()), None]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_missed_marker_ttl() {
    let (_redis, host) = start_redis().await;
    let client = std::sync::Arc::new(
        ResilientClient::open("default", ConnectionConfig::new(host))
            .await
            .unwrap(),
    );

    let missed = MissedMarker::new(client, "user:").with_ttl(Duration::from_secs(1));
    missed.set("42").await.unwrap();
    assert!(missed.has("42").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!missed.has("42").await.unwrap());
}
