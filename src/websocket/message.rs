use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Response codes carried in `{status, code, data}` notifications
pub mod codes {
    pub const CREATE_ROOM: &str = "CreateRoom";
    pub const JOIN_ROOM: &str = "JoinRoom";
    pub const LEAVE_ROOM: &str = "LeaveRoom";
    pub const INVALID_ROOM: &str = "invalidRoom";
    pub const INVALID_REQUEST: &str = "invalidRequest";
    pub const ALREADY_IN_ROOM: &str = "alreadyInRoom";
    pub const INTERNAL_ERROR: &str = "internalError";
}

/// What a client frame asks the coordinator to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomIntent {
    Create,
    Join,
    Leave,
}

/// Messages sent from client to server.
///
/// `action` is the route key clients send alongside every frame; there is
/// a single route, so it is accepted and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub data: RoomRequestData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequestData {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(rename = "type")]
    pub intent: RoomIntent,
}

/// Payload of a `{status, code, data}` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Membership {
        #[serde(rename = "connectionId")]
        connection_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },
    Failure {
        message: String,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    NewPlayer {
        #[serde(rename = "newPlayer")]
        new_player: String,
    },
    RemovedPlayer {
        #[serde(rename = "removedPlayer")]
        removed_player: String,
    },
    Response {
        status: u16,
        code: String,
        data: ResponseData,
    },
}

impl ServerMessage {
    pub fn new_player(name: impl Into<String>) -> Self {
        Self::NewPlayer {
            new_player: name.into(),
        }
    }

    pub fn removed_player(name: impl Into<String>) -> Self {
        Self::RemovedPlayer {
            removed_player: name.into(),
        }
    }

    /// Success confirmation unicast to the connection that made the request
    pub fn membership(
        code: &str,
        connection_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self::Response {
            status: 200,
            code: code.to_string(),
            data: ResponseData::Membership {
                connection_id: connection_id.into(),
                room_id: room_id.into(),
            },
        }
    }

    pub fn failure(status: u16, code: &str, message: impl Into<String>) -> Self {
        Self::Response {
            status,
            code: code.to_string(),
            data: ResponseData::Failure {
                message: message.into(),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::failure(400, codes::INVALID_REQUEST, message)
    }

    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewPlayer { .. } => "new_player",
            Self::RemovedPlayer { .. } => "removed_player",
            Self::Response { status: 200, .. } => "confirmation",
            Self::Response { .. } => "error",
        }
    }
}

/// Message queued for a socket's writer task.
///
/// Fan-out to many sockets serializes once and shares the text.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Raw(ServerMessage),
    Serialized(Arc<str>),
    /// Transport-level keepalive
    Ping,
    /// Ask the writer to close the socket
    Close,
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> Result<Self, serde_json::Error> {
        Ok(Self::Serialized(Arc::from(serde_json::to_string(message)?)))
    }

    /// JSON text for data messages; `None` for control frames
    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        match self {
            Self::Raw(message) => serde_json::to_string(message).map(Some),
            Self::Serialized(text) => Ok(Some(text.to_string())),
            Self::Ping | Self::Close => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_create_frame() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"action":"onMessage","data":{"name":"Alice","type":"Create"}}"#,
        )
        .unwrap();
        assert_eq!(msg.action.as_deref(), Some("onMessage"));
        assert_eq!(msg.data.name, "Alice");
        assert_eq!(msg.data.intent, RoomIntent::Create);
        assert!(msg.data.room_id.is_none());
    }

    #[test]
    fn test_parse_join_frame_without_action() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"data":{"name":"Bob","roomId":"V1StGXR8_Z","type":"Join"}}"#)
                .unwrap();
        assert!(msg.action.is_none());
        assert_eq!(msg.data.room_id.as_deref(), Some("V1StGXR8_Z"));
        assert_eq!(msg.data.intent, RoomIntent::Join);
    }

    #[test]
    fn test_unknown_intent_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"data":{"name":"Bob","type":"Explode"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_notification_wire_format() {
        assert_eq!(
            serde_json::to_value(ServerMessage::new_player("Alice")).unwrap(),
            json!({"newPlayer": "Alice"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::removed_player("Bob")).unwrap(),
            json!({"removedPlayer": "Bob"})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::membership(codes::JOIN_ROOM, "c1", "R1")).unwrap(),
            json!({"status": 200, "code": "JoinRoom", "data": {"connectionId": "c1", "roomId": "R1"}})
        );
        assert_eq!(
            serde_json::to_value(ServerMessage::failure(
                400,
                codes::INVALID_ROOM,
                "Invalid Room Code Provided"
            ))
            .unwrap(),
            json!({"status": 400, "code": "invalidRoom", "data": {"message": "Invalid Room Code Provided"}})
        );
    }

    #[test]
    fn test_server_message_parses_back() {
        let text = r#"{"status":200,"code":"CreateRoom","data":{"connectionId":"c","roomId":"r"}}"#;
        let msg: ServerMessage = serde_json::from_str(text).unwrap();
        assert_eq!(msg, ServerMessage::membership(codes::CREATE_ROOM, "c", "r"));

        let msg: ServerMessage = serde_json::from_str(r#"{"newPlayer":"Zed"}"#).unwrap();
        assert_eq!(msg, ServerMessage::new_player("Zed"));
    }

    #[test]
    fn test_message_kinds() {
        assert_eq!(ServerMessage::new_player("a").kind(), "new_player");
        assert_eq!(
            ServerMessage::membership(codes::LEAVE_ROOM, "c", "r").kind(),
            "confirmation"
        );
        assert_eq!(ServerMessage::invalid_request("bad").kind(), "error");
    }

    #[test]
    fn test_preserialized_matches_raw() {
        let message = ServerMessage::new_player("Alice");
        let raw = OutboundMessage::Raw(message.clone()).to_json().unwrap();
        let shared = OutboundMessage::preserialized(&message)
            .unwrap()
            .to_json()
            .unwrap();
        assert_eq!(raw, shared);
        assert_eq!(OutboundMessage::Ping.to_json().unwrap(), None);
    }
}
