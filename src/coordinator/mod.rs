//! Room coordinator.
//!
//! Drives room membership: create, join, leave and disconnect. It keeps no
//! room state of its own; every change is one conditional write against the
//! room store, and notifications go out only after that write committed.
//!
//! - Create retries with a fresh code while codes collide
//! - Join is a single atomic append that reports who was already there
//! - Removal is keyed by connection id. Only deleting the room as its sole
//!   member is checked against the version read, re-reading and retrying
//!   with backoff when a join got there first

mod error;
mod types;

use std::sync::Arc;

pub use error::CoordinatorError;
pub use types::{
    CoordinatorStats, CoordinatorStatsSnapshot, JoinIntent, JoinOutcome, JoinRequest,
    LeaveOutcome,
};

use crate::config::RoomConfig;
use crate::gateway::{DeliveryGateway, DeliveryReport};
use crate::metrics::{DeliveryMetrics, RoomMetrics};
use crate::redis::{BackoffConfig, ExponentialBackoff};
use crate::registry::{ConnectionRecord, ConnectionRegistry};
use crate::room::{
    connection_ids, is_valid_room_code, AppendOutcome, DeleteOutcome, Member, PutOutcome,
    RandomCodeGenerator, RemoveOutcome, Room, RoomCodeGenerator, RoomStore,
};
use crate::websocket::{codes, ServerMessage};

/// How a removal attempt ended
enum Removal {
    Removed {
        removed: Member,
        remaining: Vec<Member>,
    },
    RoomDeleted,
    NotMember,
    RoomMissing,
}

pub struct RoomCoordinator {
    rooms: Arc<dyn RoomStore>,
    registry: Arc<dyn ConnectionRegistry>,
    gateway: Arc<dyn DeliveryGateway>,
    codes: Arc<dyn RoomCodeGenerator>,
    config: RoomConfig,
    stats: CoordinatorStats,
}

impl RoomCoordinator {
    pub fn new(
        rooms: Arc<dyn RoomStore>,
        registry: Arc<dyn ConnectionRegistry>,
        gateway: Arc<dyn DeliveryGateway>,
        config: RoomConfig,
    ) -> Self {
        Self {
            rooms,
            registry,
            gateway,
            codes: Arc::new(RandomCodeGenerator::new(config.code_length)),
            config,
            stats: CoordinatorStats::default(),
        }
    }

    /// Replace the room code source
    pub fn with_code_generator(mut self, codes: Arc<dyn RoomCodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn rooms(&self) -> &Arc<dyn RoomStore> {
        &self.rooms
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Record a freshly opened connection in the registry
    #[tracing::instrument(name = "room.register", skip(self))]
    pub async fn register_connection(&self, connection_id: &str) -> Result<(), CoordinatorError> {
        let record = ConnectionRecord::new(connection_id, self.registry.server_id());
        self.registry.put(&record).await?;
        Ok(())
    }

    /// Create or join a room on behalf of a connection, reporting any
    /// failure back to that connection as a notification.
    pub async fn handle_join(&self, request: JoinRequest) -> Result<JoinOutcome, CoordinatorError> {
        match self.create_or_join(&request).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.report_failure(&request.connection_id, &err).await;
                Err(err)
            }
        }
    }

    /// Put the connection in a new or existing room.
    ///
    /// On success the members that were already present get `newPlayer`
    /// and the requester gets its confirmation. Nothing is sent on failure;
    /// see [`handle_join`](Self::handle_join).
    #[tracing::instrument(
        name = "room.create_or_join",
        skip(self, request),
        fields(
            connection_id = %request.connection_id,
            intent = ?request.intent,
            room_id = tracing::field::Empty
        )
    )]
    pub async fn create_or_join(
        &self,
        request: &JoinRequest,
    ) -> Result<JoinOutcome, CoordinatorError> {
        let display_name = self.validate_display_name(&request.display_name)?;

        if let Some(record) = self.registry.get(&request.connection_id).await? {
            if let Some(room_id) = record.room_id {
                return Err(CoordinatorError::AlreadyInRoom { room_id });
            }
        }

        let member = Member::new(display_name, request.connection_id.as_str());

        let (room_id, previous) = match request.intent {
            JoinIntent::Create => (self.create_room(&member).await?, Vec::new()),
            JoinIntent::Join => {
                let room_id = request
                    .room_id
                    .as_deref()
                    .map(str::trim)
                    .filter(|id| is_valid_room_code(id))
                    .ok_or_else(|| CoordinatorError::InvalidRoom {
                        room_id: request.room_id.clone().unwrap_or_default(),
                    })?;
                let previous = self.append_to_room(room_id, &member).await?;
                (room_id.to_string(), previous)
            }
        };
        tracing::Span::current().record("room_id", room_id.as_str());

        if let Err(e) = self
            .registry
            .assign_room(&member.connection_id, &room_id, &member.display_name)
            .await
        {
            tracing::error!(error = %e, "Registry update failed after joining, rolling back");
            self.compensate_join(&room_id, &member.connection_id).await;
            return Err(e.into());
        }

        match request.intent {
            JoinIntent::Create => {
                CoordinatorStats::incr(&self.stats.rooms_created);
                RoomMetrics::record_created();
            }
            JoinIntent::Join => {
                CoordinatorStats::incr(&self.stats.rooms_joined);
                RoomMetrics::record_joined();
            }
        }

        let audience = connection_ids(&previous);
        let broadcast = self
            .broadcast(&audience, ServerMessage::new_player(member.display_name.as_str()))
            .await;

        self.notify(
            &member.connection_id,
            ServerMessage::membership(
                request.intent.response_code(),
                member.connection_id.as_str(),
                room_id.as_str(),
            ),
        )
        .await;

        tracing::info!(
            display_name = %member.display_name,
            members = previous.len() + 1,
            "Connection joined room"
        );

        Ok(JoinOutcome {
            room_id,
            audience,
            broadcast,
        })
    }

    /// Leave the current room but keep the connection open.
    ///
    /// Confirms with `LeaveRoom`; a connection outside any room gets
    /// `invalidRequest`.
    #[tracing::instrument(name = "room.leave", skip(self), fields(room_id = tracing::field::Empty))]
    pub async fn leave(&self, connection_id: &str) -> Result<LeaveOutcome, CoordinatorError> {
        match self.leave_and_release(connection_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.report_failure(connection_id, &err).await;
                Err(err)
            }
        }
    }

    /// Clean up after a connection that went away.
    ///
    /// Removes it from its room (deleting the room when it was the last
    /// member), tells the remaining members, then drops the registry entry
    /// whatever happened before. Safe to call repeatedly.
    #[tracing::instrument(
        name = "room.disconnect",
        skip(self),
        fields(room_id = tracing::field::Empty)
    )]
    pub async fn handle_disconnect(
        &self,
        connection_id: &str,
    ) -> Result<LeaveOutcome, CoordinatorError> {
        CoordinatorStats::incr(&self.stats.disconnects);

        let result = self.leave_room(connection_id).await;
        let cleanup = self.registry.delete(connection_id).await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "Failed to remove disconnected connection from its room");
        }

        match (result, cleanup) {
            (Ok(outcome), Ok(_)) => Ok(outcome),
            (Ok(_), Err(e)) => {
                tracing::error!(error = %e, "Failed to delete registry entry");
                Err(e.into())
            }
            (Err(err), Err(e)) => {
                tracing::error!(error = %e, "Failed to delete registry entry");
                Err(err)
            }
            (Err(err), Ok(_)) => Err(err),
        }
    }

    fn validate_display_name(&self, name: &str) -> Result<String, CoordinatorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoordinatorError::InvalidRequest(
                "Display name must not be empty".to_string(),
            ));
        }
        if name.chars().count() > self.config.max_display_name_length {
            return Err(CoordinatorError::InvalidRequest(format!(
                "Display name must be at most {} characters",
                self.config.max_display_name_length
            )));
        }
        Ok(name.to_string())
    }

    async fn create_room(&self, creator: &Member) -> Result<String, CoordinatorError> {
        let attempts = self.config.max_create_attempts.max(1);

        for attempt in 1..=attempts {
            let room = Room::new(self.codes.generate(), creator.clone());
            match self.rooms.put_if_absent(&room).await? {
                PutOutcome::Created => return Ok(room.room_id),
                PutOutcome::AlreadyExists => {
                    RoomMetrics::record_code_collision();
                    tracing::warn!(
                        attempt = attempt,
                        room_id = %room.room_id,
                        "Room code collision, regenerating"
                    );
                }
            }
        }

        Err(CoordinatorError::RoomCreationFailed { attempts })
    }

    /// Returns the members present before the append
    async fn append_to_room(
        &self,
        room_id: &str,
        member: &Member,
    ) -> Result<Vec<Member>, CoordinatorError> {
        match self.rooms.append_member(room_id, member).await? {
            AppendOutcome::Appended { previous, .. } => Ok(previous),
            AppendOutcome::AlreadyMember => Err(CoordinatorError::AlreadyInRoom {
                room_id: room_id.to_string(),
            }),
            AppendOutcome::NotFound => Err(CoordinatorError::InvalidRoom {
                room_id: room_id.to_string(),
            }),
        }
    }

    /// Undo a committed join whose registry update failed. Nobody was told
    /// about the join yet, so nothing is broadcast.
    async fn compensate_join(&self, room_id: &str, connection_id: &str) {
        match self.remove_from_room(room_id, connection_id).await {
            Ok(Removal::RoomDeleted) => RoomMetrics::record_room_deleted(),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    room_id = %room_id,
                    connection_id = %connection_id,
                    "Could not roll back join"
                );
            }
        }
    }

    async fn leave_and_release(
        &self,
        connection_id: &str,
    ) -> Result<LeaveOutcome, CoordinatorError> {
        let outcome = self.leave_room(connection_id).await?;

        let room_id = match &outcome {
            LeaveOutcome::NotInRoom => {
                return Err(CoordinatorError::InvalidRequest(
                    "Connection is not in a room".to_string(),
                ))
            }
            LeaveOutcome::Left { room_id, .. }
            | LeaveOutcome::RoomDeleted { room_id }
            | LeaveOutcome::AlreadyGone { room_id } => room_id.clone(),
        };

        if let Some(mut record) = self.registry.get(connection_id).await? {
            record.room_id = None;
            record.display_name = None;
            self.registry.put(&record).await?;
        }

        self.notify(
            connection_id,
            ServerMessage::membership(codes::LEAVE_ROOM, connection_id, room_id.as_str()),
        )
        .await;

        Ok(outcome)
    }

    /// Take the connection out of the room its registry entry points at and
    /// notify whoever is left
    async fn leave_room(&self, connection_id: &str) -> Result<LeaveOutcome, CoordinatorError> {
        let Some(record) = self.registry.get(connection_id).await? else {
            return Ok(LeaveOutcome::NotInRoom);
        };
        let Some(room_id) = record.room_id else {
            return Ok(LeaveOutcome::NotInRoom);
        };
        tracing::Span::current().record("room_id", room_id.as_str());

        let outcome = match self.remove_from_room(&room_id, connection_id).await? {
            Removal::Removed { removed, remaining } => {
                CoordinatorStats::incr(&self.stats.members_left);
                RoomMetrics::record_member_removed();

                let remaining = connection_ids(&remaining);
                let broadcast = self
                    .broadcast(&remaining, ServerMessage::removed_player(removed.display_name))
                    .await;

                tracing::info!(remaining = remaining.len(), "Member left room");
                LeaveOutcome::Left {
                    room_id,
                    remaining,
                    broadcast,
                }
            }
            Removal::RoomDeleted => {
                CoordinatorStats::incr(&self.stats.members_left);
                CoordinatorStats::incr(&self.stats.rooms_deleted);
                RoomMetrics::record_room_deleted();

                tracing::info!(room_id = %room_id, "Last member left, room deleted");
                LeaveOutcome::RoomDeleted { room_id }
            }
            Removal::NotMember | Removal::RoomMissing => {
                RoomMetrics::record_leave_noop();
                tracing::debug!(room_id = %room_id, "Connection was no longer in the room");
                LeaveOutcome::AlreadyGone { room_id }
            }
        };

        Ok(outcome)
    }

    /// Remove a member by connection id.
    ///
    /// A sole member is removed by deleting the room, conditional on the
    /// version read so a join that lands first keeps the room alive. Version
    /// conflicts re-read and retry; once retries run out the member is taken
    /// out by connection id, which deletes the room if it is still empty.
    async fn remove_from_room(
        &self,
        room_id: &str,
        connection_id: &str,
    ) -> Result<Removal, CoordinatorError> {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::for_contention(&self.config));
        let retries = self.config.max_conditional_retries;

        for attempt in 0..retries {
            let Some(room) = self.rooms.get(room_id).await? else {
                return Ok(Removal::RoomMissing);
            };
            if !room.contains(connection_id) {
                return Ok(Removal::NotMember);
            }
            if !room.is_sole_member(connection_id) {
                break;
            }

            let current_version = match self.rooms.delete_if_version(room_id, room.version).await? {
                DeleteOutcome::Deleted => return Ok(Removal::RoomDeleted),
                DeleteOutcome::NotFound => return Ok(Removal::RoomMissing),
                DeleteOutcome::ConditionFailed { current_version } => current_version,
            };

            RoomMetrics::record_conditional_retry();
            tracing::debug!(
                attempt = attempt + 1,
                read_version = room.version,
                current_version = current_version,
                "Room changed underneath removal, retrying"
            );
            backoff.wait().await;
        }

        let removal = match self.rooms.remove_member(room_id, connection_id).await? {
            RemoveOutcome::Removed { remaining, .. } if remaining.is_empty() => Removal::RoomDeleted,
            RemoveOutcome::Removed { removed, remaining, .. } => Removal::Removed { removed, remaining },
            RemoveOutcome::NotMember => Removal::NotMember,
            RemoveOutcome::NotFound => Removal::RoomMissing,
        };
        Ok(removal)
    }

    async fn broadcast(&self, targets: &[String], message: ServerMessage) -> DeliveryReport {
        if targets.is_empty() {
            return DeliveryReport::default();
        }

        DeliveryMetrics::record_sent(message.kind());
        let report = self.gateway.post_to_connections(targets, &message).await;
        if report.failed > 0 {
            tracing::debug!(
                failed = report.failed,
                kind = message.kind(),
                "Some room members could not be notified"
            );
        }
        report
    }

    /// Unicast to one connection. A requester that is already gone is not
    /// an error.
    async fn notify(&self, connection_id: &str, message: ServerMessage) {
        DeliveryMetrics::record_sent(message.kind());
        let report = self
            .gateway
            .post_to_connections(&[connection_id.to_string()], &message)
            .await;
        if report.failed > 0 {
            tracing::debug!(
                connection_id = %connection_id,
                kind = message.kind(),
                "Requesting connection is gone, notification dropped"
            );
        }
    }

    async fn report_failure(&self, connection_id: &str, err: &CoordinatorError) {
        CoordinatorStats::incr(&self.stats.failed_requests);
        RoomMetrics::record_failure(err.reason());

        match err {
            CoordinatorError::InternalError(_) | CoordinatorError::RoomCreationFailed { .. } => {
                tracing::error!(connection_id = %connection_id, error = %err, "Room request failed");
            }
            _ => {
                tracing::info!(connection_id = %connection_id, error = %err, "Room request rejected");
            }
        }

        if let CoordinatorError::InvalidRoom { .. } = err {
            if let Err(e) = self.registry.delete(connection_id).await {
                tracing::warn!(error = %e, "Failed to delete registry entry after invalid join");
            }
        }

        self.notify(connection_id, err.to_notification()).await;
    }
}
