//! In-memory room store.
//!
//! DashMap shard locks give each room record its own critical section, so
//! every operation here is atomic per room without a global lock.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::{
    AppendOutcome, DeleteOutcome, PutOutcome, RemoveOutcome, RoomStore, StoreBackend, StoreError,
};
use super::{Member, Room};

#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<String, Room>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Memory
    }

    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(room_id).map(|r| r.value().clone()))
    }

    async fn put_if_absent(&self, room: &Room) -> Result<PutOutcome, StoreError> {
        match self.rooms.entry(room.room_id.clone()) {
            Entry::Occupied(_) => Ok(PutOutcome::AlreadyExists),
            Entry::Vacant(slot) => {
                slot.insert(room.clone());
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn append_member(
        &self,
        room_id: &str,
        member: &Member,
    ) -> Result<AppendOutcome, StoreError> {
        let Some(mut room) = self.rooms.get_mut(room_id) else {
            return Ok(AppendOutcome::NotFound);
        };

        if room.contains(&member.connection_id) {
            return Ok(AppendOutcome::AlreadyMember);
        }

        let previous = room.members.clone();
        room.members.push(member.clone());
        room.version += 1;

        Ok(AppendOutcome::Appended {
            previous,
            version: room.version,
        })
    }

    async fn remove_member(
        &self,
        room_id: &str,
        connection_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        let Entry::Occupied(mut slot) = self.rooms.entry(room_id.to_string()) else {
            return Ok(RemoveOutcome::NotFound);
        };

        let room = slot.get_mut();
        let Some(index) = room
            .members
            .iter()
            .position(|m| m.connection_id == connection_id)
        else {
            return Ok(RemoveOutcome::NotMember);
        };

        let removed = room.members.remove(index);
        room.version += 1;
        let version = room.version;
        let remaining = room.members.clone();

        if remaining.is_empty() {
            slot.remove();
        }

        Ok(RemoveOutcome::Removed {
            removed,
            remaining,
            version,
        })
    }

    async fn delete_if_version(
        &self,
        room_id: &str,
        expected_version: u64,
    ) -> Result<DeleteOutcome, StoreError> {
        let Entry::Occupied(slot) = self.rooms.entry(room_id.to_string()) else {
            return Ok(DeleteOutcome::NotFound);
        };

        let current_version = slot.get().version;
        if current_version != expected_version {
            return Ok(DeleteOutcome::ConditionFailed { current_version });
        }

        slot.remove();
        Ok(DeleteOutcome::Deleted)
    }

    async fn room_count(&self) -> Result<usize, StoreError> {
        Ok(self.rooms.len())
    }
}
