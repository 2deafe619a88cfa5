//! Connection registry.
//!
//! Durable map from connection id to the room it sits in and the instance
//! holding its socket. Entries are owned by their connection: only that
//! connection's own lifecycle writes them, so they are never contended.

mod memory;
mod redis_registry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::redis::RedisPool;
use crate::room::{StoreBackend, StoreError};

pub use memory::MemoryConnectionRegistry;
pub use redis_registry::RedisConnectionRegistry;

/// Registry entry for one live connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    /// Instance holding the socket
    pub server_id: String,
    pub room_id: Option<String>,
    pub display_name: Option<String>,
    /// Unix seconds
    pub connected_at: i64,
}

impl ConnectionRecord {
    pub fn new(connection_id: impl Into<String>, server_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            server_id: server_id.into(),
            room_id: None,
            display_name: None,
            connected_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> StoreBackend;

    /// Instance id written into entries created by this registry
    fn server_id(&self) -> &str;

    /// Insert or replace an entry
    async fn put(&self, record: &ConnectionRecord) -> Result<(), StoreError>;

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Point an entry at a room, creating the entry if it does not exist
    async fn assign_room(
        &self,
        connection_id: &str,
        room_id: &str,
        display_name: &str,
    ) -> Result<(), StoreError>;

    /// Remove an entry. Returns whether one existed; deleting twice is fine.
    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError>;

    /// Number of registered connections across all instances
    async fn connection_count(&self) -> Result<usize, StoreError>;
}

/// Create a connection registry based on configuration.
///
/// Uses the same backend selection as the room store so both live side by
/// side; `"redis"` without a pool falls back to memory.
pub fn create_connection_registry(
    settings: &StoreConfig,
    redis_pool: Option<Arc<RedisPool>>,
    server_id: &str,
) -> Arc<dyn ConnectionRegistry> {
    match (settings.backend.as_str(), redis_pool) {
        ("redis", Some(pool)) => {
            tracing::info!(
                backend = "redis",
                prefix = %settings.key_prefix,
                server_id = %server_id,
                "Creating Redis connection registry"
            );
            Arc::new(RedisConnectionRegistry::new(
                pool,
                settings.key_prefix.clone(),
                server_id.to_string(),
            ))
        }
        ("redis", None) => {
            tracing::warn!(
                "Redis connection registry requested but no pool provided, falling back to memory"
            );
            Arc::new(MemoryConnectionRegistry::new(server_id))
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory connection registry");
            Arc::new(MemoryConnectionRegistry::new(server_id))
        }
    }
}
