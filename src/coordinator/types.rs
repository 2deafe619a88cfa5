use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::gateway::DeliveryReport;
use crate::websocket::codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinIntent {
    Create,
    Join,
}

impl JoinIntent {
    /// Code of the success confirmation
    pub fn response_code(&self) -> &'static str {
        match self {
            JoinIntent::Create => codes::CREATE_ROOM,
            JoinIntent::Join => codes::JOIN_ROOM,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub intent: JoinIntent,
    pub display_name: String,
    /// Required for `Join`, ignored for `Create`
    pub room_id: Option<String>,
    pub connection_id: String,
}

impl JoinRequest {
    pub fn create(display_name: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            intent: JoinIntent::Create,
            display_name: display_name.into(),
            room_id: None,
            connection_id: connection_id.into(),
        }
    }

    pub fn join(
        display_name: impl Into<String>,
        room_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            intent: JoinIntent::Join,
            display_name: display_name.into(),
            room_id: Some(room_id.into()),
            connection_id: connection_id.into(),
        }
    }
}

/// Result of a successful create or join
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub room_id: String,
    /// Connections that were told about the new player: the members present
    /// before the join committed
    pub audience: Vec<String>,
    pub broadcast: DeliveryReport,
}

/// Result of removing a connection from its room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The connection was not registered in any room
    NotInRoom,
    /// Removed; the remaining members were notified
    Left {
        room_id: String,
        remaining: Vec<String>,
        broadcast: DeliveryReport,
    },
    /// The connection was the last member; the room is gone
    RoomDeleted { room_id: String },
    /// The room or the seat was already gone
    AlreadyGone { room_id: String },
}

impl LeaveOutcome {
    pub fn room_id(&self) -> Option<&str> {
        match self {
            LeaveOutcome::NotInRoom => None,
            LeaveOutcome::Left { room_id, .. }
            | LeaveOutcome::RoomDeleted { room_id }
            | LeaveOutcome::AlreadyGone { room_id } => Some(room_id),
        }
    }
}

/// Statistics for the coordinator
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    pub rooms_created: AtomicU64,
    pub rooms_joined: AtomicU64,
    pub rooms_deleted: AtomicU64,
    pub members_left: AtomicU64,
    pub disconnects: AtomicU64,
    pub failed_requests: AtomicU64,
}

impl CoordinatorStats {
    pub fn snapshot(&self) -> CoordinatorStatsSnapshot {
        CoordinatorStatsSnapshot {
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            rooms_joined: self.rooms_joined.load(Ordering::Relaxed),
            rooms_deleted: self.rooms_deleted.load(Ordering::Relaxed),
            members_left: self.members_left.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }

    pub(super) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatsSnapshot {
    pub rooms_created: u64,
    pub rooms_joined: u64,
    pub rooms_deleted: u64,
    pub members_left: u64,
    pub disconnects: u64,
    pub failed_requests: u64,
}
