//! Named connection registry.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{ConnectionConfig, Connector, RedisError, RegistryConfig, ResilientClient, Result, TcpConnector};

/// Lazily connected clients keyed by logical name.
///
/// The first lookup of a name runs the connect sequence and caches the
/// client; later lookups share it. Pass the registry (usually behind an
/// `Arc`) to whatever needs Redis instead of reaching for global state.
pub struct ConnectionRegistry<C: Connector = TcpConnector> {
    config: RegistryConfig,
    connector: C,
    clients: Mutex<HashMap<String, Arc<ResilientClient<C>>>>,
}

impl ConnectionRegistry<TcpConnector> {
    /// Create a registry connecting over TCP.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_connector(config, TcpConnector)
    }
}

impl<C: Connector> ConnectionRegistry<C> {
    /// Create a registry using a custom connector.
    pub fn with_connector(config: RegistryConfig, connector: C) -> Self {
        Self {
            config,
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this registry was built from.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Configuration for a named connection.
    pub fn connection_config(&self, name: &str) -> Result<&ConnectionConfig> {
        self.config
            .get(name)
            .ok_or_else(|| RedisError::Config(format!("Redis connection {} not found", name)))
    }

    /// Get the client for `name`, connecting on first use.
    pub async fn connection(&self, name: &str) -> Result<Arc<ResilientClient<C>>> {
        let mut clients = self.clients.lock().await;

        if let Some(client) = clients.get(name) {
            return Ok(client.clone());
        }

        let config = self.connection_config(name)?.clone();
        debug!(connection = %name, "Opening Redis connection");

        let client = Arc::new(ResilientClient::connect(name, config, self.connector.clone()).await?);

        if self.config.keepalive {
            client.spawn_keepalive();
        }

        clients.insert(name.to_string(), client.clone());
        info!(connection = %name, "Redis connection registered");

        Ok(client)
    }

    /// Shortcut for the `default` connection.
    pub async fn default_connection(&self) -> Result<Arc<ResilientClient<C>>> {
        self.connection("default").await
    }

    /// Whether `name` has been connected already.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.clients.lock().await.contains_key(name)
    }
}
