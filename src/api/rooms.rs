//! Room lookup endpoint.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::room::{is_valid_room_code, Member};
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomResponse {
    pub room_id: String,
    pub members: Vec<Member>,
    pub member_count: usize,
    pub version: u64,
}

/// GET /api/v1/rooms/{room_id} - Current members of a room
#[tracing::instrument(name = "api.get_room", skip(state))]
pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>> {
    if !is_valid_room_code(&room_id) {
        return Err(AppError::Validation(format!("Invalid room code: {}", room_id)));
    }

    let room = state
        .coordinator
        .rooms()
        .get(&room_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Room '{}' not found", room_id)))?;

    Ok(Json(RoomResponse {
        member_count: room.members.len(),
        room_id: room.room_id,
        members: room.members,
        version: room.version,
    }))
}
