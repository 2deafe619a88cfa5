//! Room store contract.
//!
//! Every mutation is a single atomic conditional write. Backends never hand
//! out a read-modify-write window: appends and removals are evaluated
//! against the stored record and either commit or report why they did not.
//!
//! Appends and removals are conditioned on the room existing and on the
//! connection's membership, so they commute with each other. Only the
//! whole-room delete is checked against a version.

use async_trait::async_trait;

use crate::redis::PoolError;

use super::{Member, Room};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is temporarily unavailable (e.g., circuit breaker open)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// A script or command answered with something we cannot interpret
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Redis(e) => StoreError::Redis(e),
            PoolError::CircuitOpen => {
                StoreError::Unavailable("Circuit breaker is open".to_string())
            }
        }
    }
}

/// Backend type for room and connection stores
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process maps, single instance only
    Memory,
    /// Redis-backed, shared by every instance
    Redis,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis => "redis",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// A record with this id already exists; nothing was written
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The member was appended. `previous` is the member list as it was
    /// immediately before this append committed.
    Appended { previous: Vec<Member>, version: u64 },
    /// The connection already holds a seat in this room
    AlreadyMember,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The member was removed. When `remaining` is empty the record itself
    /// was deleted, so a room is never stored without members.
    Removed {
        removed: Member,
        remaining: Vec<Member>,
        version: u64,
    },
    NotMember,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The stored version no longer matches the one the caller read
    ConditionFailed { current_version: u64 },
    NotFound,
}

/// Persistent room records keyed by room id
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Get the backend type
    fn backend_type(&self) -> StoreBackend;

    /// Read a room record
    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    /// Write a new room, failing if the id is already taken
    async fn put_if_absent(&self, room: &Room) -> Result<PutOutcome, StoreError>;

    /// Append a member to an existing room.
    ///
    /// Concurrent appends to the same room are serialized; each caller sees
    /// exactly the members that committed before it.
    async fn append_member(
        &self,
        room_id: &str,
        member: &Member,
    ) -> Result<AppendOutcome, StoreError>;

    /// Remove the member holding `connection_id` if the room exists and
    /// still seats it. Removing the last member deletes the record.
    async fn remove_member(
        &self,
        room_id: &str,
        connection_id: &str,
    ) -> Result<RemoveOutcome, StoreError>;

    /// Delete the room, only if it is still at `expected_version`
    async fn delete_if_version(
        &self,
        room_id: &str,
        expected_version: u64,
    ) -> Result<DeleteOutcome, StoreError>;

    /// Number of live rooms
    async fn room_count(&self) -> Result<usize, StoreError>;
}
