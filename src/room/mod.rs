//! Rooms and their persistence.
//!
//! A room is identified by a short URL-safe code and holds its members in
//! join order. Storage sits behind [`RoomStore`] so a single instance can
//! run in memory while a cluster shares Redis.

mod code;
mod memory_store;
mod redis_store;
mod store;
mod types;

use std::sync::Arc;

pub use code::{is_valid_room_code, RandomCodeGenerator, RoomCodeGenerator, ROOM_CODE_ALPHABET};
pub use memory_store::MemoryRoomStore;
pub use redis_store::RedisRoomStore;
pub use store::{
    AppendOutcome, DeleteOutcome, PutOutcome, RemoveOutcome, RoomStore, StoreBackend, StoreError,
};
pub use types::{connection_ids, Member, Room};

use crate::config::StoreConfig;
use crate::redis::RedisPool;

/// Create a room store based on configuration.
///
/// `"redis"` needs a pool; without one this falls back to memory.
pub fn create_room_store(
    settings: &StoreConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn RoomStore> {
    match (settings.backend.as_str(), redis_pool) {
        ("redis", Some(pool)) => {
            tracing::info!(
                backend = "redis",
                prefix = %settings.key_prefix,
                "Creating Redis room store"
            );
            Arc::new(RedisRoomStore::new(pool, settings.key_prefix.clone()))
        }
        ("redis", None) => {
            tracing::warn!("Redis room store requested but no pool provided, falling back to memory");
            Arc::new(MemoryRoomStore::new())
        }
        _ => {
            tracing::info!(backend = "memory", "Creating memory room store");
            Arc::new(MemoryRoomStore::new())
        }
    }
}
