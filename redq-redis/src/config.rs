//! Connection configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::{RedisError, Result};

/// Default Redis port used when the host string carries none.
pub const DEFAULT_PORT: u16 = 6379;

/// Configuration for one logical Redis connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Redis endpoint, e.g. `redis://127.0.0.1:6379`.
    pub host: String,
    /// Logical database index.
    #[serde(default)]
    pub database: i64,
    /// Authentication secret.
    #[serde(default)]
    pub auth: Option<String>,
    /// Connect timeout.
    #[serde(with = "secs_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Keepalive interval.
    #[serde(with = "secs_serde", default = "default_ping")]
    pub ping: Duration,
    /// Key prefix applied to every key issued on this connection.
    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_ping() -> Duration {
    Duration::from_secs(55)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "redis://127.0.0.1:6379".to_string(),
            database: 0,
            auth: None,
            timeout: default_timeout(),
            ping: default_ping(),
            prefix: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a new configuration for the given host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> ConnectionConfigBuilder {
        let mut builder = ConnectionConfigBuilder::new();

        if let Ok(host) = std::env::var("REDQ_REDIS_HOST") {
            builder = builder.host(host);
        }

        if let Ok(db) = std::env::var("REDQ_REDIS_DATABASE")
            && let Ok(db) = db.parse() {
                builder = builder.database(db);
            }

        if let Ok(auth) = std::env::var("REDQ_REDIS_AUTH") {
            builder = builder.auth(auth);
        }

        if let Ok(timeout) = std::env::var("REDQ_REDIS_TIMEOUT")
            && let Ok(secs) = timeout.parse() {
                builder = builder.timeout(Duration::from_secs(secs));
            }

        if let Ok(ping) = std::env::var("REDQ_REDIS_PING")
            && let Ok(secs) = ping.parse() {
                builder = builder.ping(Duration::from_secs(secs));
            }

        if let Ok(prefix) = std::env::var("REDQ_REDIS_PREFIX") {
            builder = builder.prefix(prefix);
        }

        builder
    }

    /// Parse `host` into a hostname and port.
    ///
    /// A bare `host:port` is accepted and treated as `redis://host:port`.
    pub fn endpoint(&self) -> Result<(String, u16)> {
        let raw = self.host.trim();
        let parsed = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("redis://{}", raw))
        }
        .map_err(|e| RedisError::Config(format!("invalid host '{}': {}", self.host, e)))?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RedisError::Config(format!("no hostname in '{}'", self.host)))?;

        // IPv6 literals come back bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();

        Ok((host, parsed.port().unwrap_or(DEFAULT_PORT)))
    }

    /// The key prefix, or an empty string.
    pub fn key_prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
        }
    }

    /// Set the endpoint.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the database index.
    pub fn database(mut self, db: i64) -> Self {
        self.config.database = db;
        self
    }

    /// Set the authentication secret.
    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.config.auth = Some(auth.into());
        self
    }

    /// Set the connect timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the keepalive interval.
    pub fn ping(mut self, ping: Duration) -> Self {
        self.config.ping = ping;
        self
    }

    /// Set the key prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = Some(prefix.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Named connection configurations for a [`ConnectionRegistry`](crate::ConnectionRegistry).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Connections keyed by logical name.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
    /// Start the keepalive timer for every connection the registry opens.
    #[serde(default)]
    pub keepalive: bool,
}

impl RegistryConfig {
    /// Create an empty registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document of the form
    /// `{"connections": {"default": {"host": "redis://..."}}, "keepalive": true}`.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add a named connection.
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Enable or disable keepalive.
    pub fn with_keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Look up a named connection.
    pub fn get(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.get(name)
    }
}

mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
