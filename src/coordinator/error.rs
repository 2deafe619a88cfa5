use crate::room::StoreError;
use crate::websocket::{codes, ServerMessage};

/// Message sent for failures whose detail stays in the logs
const GENERIC_FAILURE_MESSAGE: &str = "Unable to process room request";

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Malformed request, e.g. an empty or oversized display name
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Join on a room that does not exist
    #[error("Room {room_id} does not exist")]
    InvalidRoom { room_id: String },

    /// The connection already holds a seat
    #[error("Connection is already in room {room_id}")]
    AlreadyInRoom { room_id: String },

    /// Every generated code collided with an existing room
    #[error("No free room code after {attempts} attempts")]
    RoomCreationFailed { attempts: u32 },

    /// Store or registry unavailable
    #[error("Internal error: {0}")]
    InternalError(#[from] StoreError),
}

impl CoordinatorError {
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::InvalidRoom { .. } => 400,
            Self::AlreadyInRoom { .. } => 409,
            Self::RoomCreationFailed { .. } | Self::InternalError(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => codes::INVALID_REQUEST,
            Self::InvalidRoom { .. } => codes::INVALID_ROOM,
            Self::AlreadyInRoom { .. } => codes::ALREADY_IN_ROOM,
            Self::RoomCreationFailed { .. } | Self::InternalError(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidRoom { .. } => "invalid_room",
            Self::AlreadyInRoom { .. } => "already_in_room",
            Self::RoomCreationFailed { .. } => "room_creation_failed",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Structured notification for the requesting connection
    pub fn to_notification(&self) -> ServerMessage {
        let message = match self {
            Self::InvalidRequest(detail) => detail.clone(),
            Self::InvalidRoom { .. } => "Invalid Room Code Provided".to_string(),
            Self::AlreadyInRoom { .. } => "Connection is already in a room".to_string(),
            Self::RoomCreationFailed { .. } | Self::InternalError(_) => {
                GENERIC_FAILURE_MESSAGE.to_string()
            }
        };
        ServerMessage::failure(self.status(), self.code(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invalid_room_notification() {
        let err = CoordinatorError::InvalidRoom {
            room_id: "NOPE".to_string(),
        };
        assert_eq!(
            serde_json::to_value(err.to_notification()).unwrap(),
            json!({"status": 400, "code": "invalidRoom", "data": {"message": "Invalid Room Code Provided"}})
        );
    }

    #[test]
    fn test_internal_detail_is_not_sent() {
        let err = CoordinatorError::InternalError(StoreError::Unavailable(
            "Circuit breaker is open".to_string(),
        ));
        let text = serde_json::to_string(&err.to_notification()).unwrap();
        assert!(text.contains("internalError"));
        assert!(!text.contains("Circuit breaker"));
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CoordinatorError::InvalidRequest("x".into()).status(), 400);
        assert_eq!(
            CoordinatorError::AlreadyInRoom { room_id: "r".into() }.code(),
            "alreadyInRoom"
        );
        assert_eq!(
            CoordinatorError::RoomCreationFailed { attempts: 5 }.reason(),
            "room_creation_failed"
        );
    }
}
