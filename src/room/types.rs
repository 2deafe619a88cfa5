//! Room record and member entries as persisted by every store backend

use serde::{Deserialize, Serialize};

/// One seat in a room: who sits there and which connection they play from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub display_name: String,
    pub connection_id: String,
}

impl Member {
    pub fn new(display_name: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            connection_id: connection_id.into(),
        }
    }
}

/// A room record.
///
/// `members` is in join order and is never empty while the record exists.
/// `version` increases on every committed mutation and is the token that
/// conditional removals and deletions are checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub members: Vec<Member>,
    pub version: u64,
}

impl Room {
    pub fn new(room_id: impl Into<String>, creator: Member) -> Self {
        Self {
            room_id: room_id.into(),
            members: vec![creator],
            version: 1,
        }
    }

    pub fn member(&self, connection_id: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|m| m.connection_id == connection_id)
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.member(connection_id).is_some()
    }

    /// True when `connection_id` is the only member left
    pub fn is_sole_member(&self, connection_id: &str) -> bool {
        self.members.len() == 1 && self.contains(connection_id)
    }
}

/// Connection ids of a member list, in join order
pub fn connection_ids(members: &[Member]) -> Vec<String> {
    members.iter().map(|m| m.connection_id.clone()).collect()
}
