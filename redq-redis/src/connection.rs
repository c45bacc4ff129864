//! Transport seam between the resilient client and a Redis server.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info};

use crate::{Command, ConnectionConfig, RedisError, Reply, Result};

/// A live connection able to execute commands.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Execute one command. Keys are expected to be prefixed already.
    async fn execute(&mut self, command: &Command) -> Result<Reply>;
}

/// Opens connections from configuration.
///
/// The resilient client keeps the connector around so it can run the full
/// connect sequence again after the link drops.
#[async_trait]
pub trait Connector: Clone + Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: Connection;

    /// Connect, then authenticate and select the database as configured.
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection>;
}

/// Connector for a real Redis server over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

/// A TCP connection to Redis.
pub struct TcpConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Connector for TcpConnector {
    type Connection = TcpConnection;

    async fn connect(&self, config: &ConnectionConfig) -> Result<TcpConnection> {
        let (host, port) = config.endpoint()?;
        let url = if host.contains(':') {
            format!("redis://[{}]:{}", host, port)
        } else {
            format!("redis://{}:{}", host, port)
        };

        let client = redis::Client::open(url.as_str())
            .map_err(|e| RedisError::Connection(format!("Redis connect {}:{} fail: {}", host, port, e)))?;

        let conn = tokio::time::timeout(config.timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| RedisError::Timeout)?
            .map_err(|e| RedisError::Connection(format!("Redis connect {}:{} fail: {}", host, port, e)))?;

        let mut connection = TcpConnection { conn };

        if let Some(auth) = config.auth.as_deref().filter(|a| !a.is_empty()) {
            connection
                .execute(&Command::new("AUTH").arg(auth))
                .await
                .map_err(|e| RedisError::Auth(e.to_string()))?;
        }

        if config.database != 0 {
            connection
                .execute(&Command::new("SELECT").arg(config.database))
                .await
                .map_err(|e| {
                    RedisError::Connection(format!("SELECT {} failed: {}", config.database, e))
                })?;
        }

        info!(host = %host, port = port, database = config.database, "Redis connection established");

        Ok(connection)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn execute(&mut self, command: &Command) -> Result<Reply> {
        debug!(command = command.name(), "Executing Redis command");
        let value: redis::Value = command.to_redis_cmd().query_async(&mut self.conn).await?;
        reply_from_value(value)
    }
}

fn reply_from_value(value: redis::Value) -> Result<Reply> {
    use redis::Value;

    Ok(match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(bytes) => Reply::Bulk(bytes),
        Value::SimpleString(status) => Reply::Status(status),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Boolean(flag) => Reply::Int(i64::from(flag)),
        Value::Double(d) => Reply::Bulk(d.to_string().into_bytes()),
        Value::Array(items) | Value::Set(items) => Reply::Array(
            items
                .into_iter()
                .map(reply_from_value)
                .collect::<Result<Vec<_>>>()?,
        ),
        other => {
            return Err(RedisError::Command(format!(
                "unsupported reply type: {:?}",
                other
            )));
        }
    })
}
