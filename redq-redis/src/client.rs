//! Resilient Redis client.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{Command, Connection, ConnectionConfig, Connector, RedisError, Reply, Result, TcpConnector};

/// A single Redis connection that reconnects once on a dead link.
///
/// Commands are serialized through one connection. When a command fails
/// with a lost-connection error the full connect sequence runs again with
/// the last known configuration and the command is retried exactly once.
/// Any other error, or a failure of the retry, is returned unchanged.
pub struct ResilientClient<C: Connector = TcpConnector> {
    name: String,
    config: ConnectionConfig,
    connector: C,
    connection: Mutex<Option<C::Connection>>,
    reconnects: AtomicU64,
}

impl ResilientClient<TcpConnector> {
    /// Connect to a Redis server over TCP.
    pub async fn open(name: impl Into<String>, config: ConnectionConfig) -> Result<Self> {
        Self::connect(name, config, TcpConnector).await
    }
}

impl<C: Connector> ResilientClient<C> {
    /// Connect using the given connector.
    pub async fn connect(
        name: impl Into<String>,
        config: ConnectionConfig,
        connector: C,
    ) -> Result<Self> {
        let name = name.into();
        let connection = connector.connect(&config).await?;

        info!(connection = %name, host = %config.host, "Redis client ready");

        Ok(Self {
            name,
            config,
            connector,
            connection: Mutex::new(Some(connection)),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Logical connection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of reconnects performed so far.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Execute a command, applying the key prefix.
    pub async fn execute(&self, command: Command) -> Result<Reply> {
        let command = command.prefixed(self.config.key_prefix());
        let mut guard = self.connection.lock().await;

        trace!(connection = %self.name, command = command.name(), "execute");

        let first = match guard.as_mut() {
            Some(conn) => conn.execute(&command).await,
            // A previous reconnect failed; treat the slot as a lost link.
            None => Err(RedisError::Connection("connection lost".to_string())),
        };

        match first {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_connection_lost() => {
                warn!(
                    connection = %self.name,
                    command = command.name(),
                    error = %err,
                    "Redis connection lost, reconnecting"
                );
                *guard = None;

                let mut conn = self.connector.connect(&self.config).await?;
                self.reconnects.fetch_add(1, Ordering::Relaxed);

                let retried = conn.execute(&command).await;
                *guard = Some(conn);
                retried
            }
            Err(err) => Err(err),
        }
    }

    /// `PING`.
    pub async fn ping(&self) -> Result<()> {
        self.execute(Command::new("PING")).await.map(|_| ())
    }

    /// `RPUSH key value...`, returning the new list length.
    pub async fn rpush<V: AsRef<str>>(&self, key: &str, values: &[V]) -> Result<i64> {
        let command = values
            .iter()
            .fold(Command::new("RPUSH").key(key), |cmd, v| cmd.arg(v.as_ref()));
        self.execute(command).await?.as_int()
    }

    /// `LPUSH key value...`, returning the new list length.
    pub async fn lpush<V: AsRef<str>>(&self, key: &str, values: &[V]) -> Result<i64> {
        let command = values
            .iter()
            .fold(Command::new("LPUSH").key(key), |cmd, v| cmd.arg(v.as_ref()));
        self.execute(command).await?.as_int()
    }

    /// `LPOP key`.
    pub async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.execute(Command::new("LPOP").key(key)).await?.into_string()
    }

    /// `LLEN key`.
    pub async fn llen(&self, key: &str) -> Result<i64> {
        self.execute(Command::new("LLEN").key(key)).await?.as_int()
    }

    /// `ZADD key score member`, returning the number of new members.
    pub async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<i64> {
        self.execute(Command::new("ZADD").key(key).arg(score).arg(member))
            .await?
            .as_int()
    }

    /// `ZREM key member`, returning the number of removed members.
    pub async fn zrem(&self, key: &str, member: &str) -> Result<i64> {
        self.execute(Command::new("ZREM").key(key).arg(member))
            .await?
            .as_int()
    }

    /// `ZRANGEBYSCORE key min max`.
    pub async fn zrangebyscore(&self, key: &str, min: &str, max: &str) -> Result<Vec<String>> {
        self.execute(Command::new("ZRANGEBYSCORE").key(key).arg(min).arg(max))
            .await?
            .into_strings()
    }

    /// `ZSCORE key member`.
    pub async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let reply = self.execute(Command::new("ZSCORE").key(key).arg(member)).await?;
        match reply.into_string()? {
            Some(score) => score
                .parse::<f64>()
                .map(|s| Some(s as i64))
                .map_err(|e| RedisError::Command(format!("invalid score '{}': {}", score, e))),
            None => Ok(None),
        }
    }

    /// `ZCARD key`.
    pub async fn zcard(&self, key: &str) -> Result<i64> {
        self.execute(Command::new("ZCARD").key(key)).await?.as_int()
    }

    /// `DEL key`, returning the number of removed keys.
    pub async fn del(&self, key: &str) -> Result<i64> {
        self.execute(Command::new("DEL").key(key)).await?.as_int()
    }

    /// `EXISTS key`.
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.execute(Command::new("EXISTS").key(key)).await?.as_int()? > 0)
    }

    /// `SETEX key seconds value`.
    pub async fn setex(&self, key: &str, ttl: Duration, value: &str) -> Result<()> {
        self.execute(
            Command::new("SETEX")
                .key(key)
                .arg(ttl.as_secs().max(1))
                .arg(value),
        )
        .await
        .map(|_| ())
    }

    /// `HGET key field`.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.execute(Command::new("HGET").key(key).arg(field))
            .await?
            .into_string()
    }

    /// `HMGET key field...`.
    pub async fn hmget<F: AsRef<str>>(&self, key: &str, fields: &[F]) -> Result<Vec<Option<String>>> {
        let command = fields
            .iter()
            .fold(Command::new("HMGET").key(key), |cmd, f| cmd.arg(f.as_ref()));
        self.execute(command).await?.into_optional_strings()
    }

    /// `HSET key field value`.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<i64> {
        self.execute(Command::new("HSET").key(key).arg(field).arg(value))
            .await?
            .as_int()
    }

    /// `HDEL key field`.
    pub async fn hdel(&self, key: &str, field: &str) -> Result<i64> {
        self.execute(Command::new("HDEL").key(key).arg(field))
            .await?
            .as_int()
    }

    /// Start the keepalive timer.
    ///
    /// Issues `PING` every `ping` interval until the client is dropped.
    /// Failures are logged and otherwise ignored.
    pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let client = Arc::downgrade(self);
        let period = self.config.ping.max(Duration::from_secs(1));
        let name = self.name.clone();

        debug!(connection = %name, interval = ?period, "Starting Redis keepalive");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = client.upgrade() else {
                    debug!(connection = %name, "Redis keepalive stopped");
                    break;
                };
                if let Err(e) = client.ping().await {
                    warn!(connection = %name, error = %e, "Redis keepalive ping failed");
                }
            }
        })
    }
}
