//! # redq Redis
//!
//! Redis client layer for redq: a single connection per logical name that
//! survives a dropped link by reconnecting once and retrying the command.
//!
//! ## Features
//!
//! - **Reconnect once**: lost-connection errors trigger a full reconnect
//!   (connect, `AUTH`, `SELECT`) followed by a single retry
//! - **Named connections**: a registry connects lazily and shares clients
//! - **Key prefixes**: applied to key arguments only
//! - **Keepalive**: optional periodic `PING`
//! - **In-memory backend**: `MemoryConnector` for tests, with fault injection
//!   (`test-util` feature)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use redq_redis::{ConnectionConfig, ConnectionRegistry, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RegistryConfig::new()
//!         .with_connection("default", ConnectionConfig::from_env().build())
//!         .with_keepalive(true);
//!
//!     let registry = ConnectionRegistry::new(config);
//!     let redis = registry.connection("default").await?;
//!
//!     redis.rpush("waiting:emails", &["{...}"]).await?;
//!     let len = redis.llen("waiting:emails").await?;
//!     println!("{} jobs waiting", len);
//!
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod command;
mod config;
mod connection;
mod error;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod registry;

pub use cache::{CachedHash, DEFAULT_MISSED_TTL, MissedMarker};
pub use client::ResilientClient;
pub use command::{Command, CommandArg, Reply, ToArg};
pub use config::{ConnectionConfig, ConnectionConfigBuilder, DEFAULT_PORT, RegistryConfig};
pub use connection::{Connection, Connector, TcpConnection, TcpConnector};
pub use error::{RedisError, Result};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryConnection, MemoryConnector};
pub use registry::ConnectionRegistry;

// Re-export redis crate for convenience
pub use redis;

/// Prelude for common imports.
///
/// ```
/// use redq_redis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::cache::{CachedHash, MissedMarker};
    pub use crate::client::ResilientClient;
    pub use crate::command::{Command, Reply};
    pub use crate::config::{ConnectionConfig, ConnectionConfigBuilder, RegistryConfig};
    pub use crate::connection::{Connection, Connector, TcpConnector};
    pub use crate::error::{RedisError, Result};
    #[cfg(any(test, feature = "test-util"))]
    pub use crate::memory::MemoryConnector;
    pub use crate::registry::ConnectionRegistry;
}
