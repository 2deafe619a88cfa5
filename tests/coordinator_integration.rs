//! Room coordinator integration tests
//!
//! Runs the coordinator against the in-memory store and registry with a
//! gateway double that records every delivery.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_test::{assert_err, assert_ok};

use pwf_room_service::config::RoomConfig;
use pwf_room_service::coordinator::{CoordinatorError, JoinRequest, LeaveOutcome, RoomCoordinator};
use pwf_room_service::gateway::{DeliveryGateway, DeliveryReport};
use pwf_room_service::registry::{ConnectionRecord, ConnectionRegistry, MemoryConnectionRegistry};
use pwf_room_service::room::{
    AppendOutcome, DeleteOutcome, Member, MemoryRoomStore, PutOutcome, RemoveOutcome, Room,
    RoomStore, StoreBackend, StoreError,
};
use pwf_room_service::websocket::{codes, ResponseData, ServerMessage};

/// Records deliveries instead of sending them
#[derive(Default)]
struct RecordingGateway {
    sent: Mutex<Vec<(Vec<String>, ServerMessage)>>,
}

impl RecordingGateway {
    fn all(&self) -> Vec<(Vec<String>, ServerMessage)> {
        self.sent.lock().unwrap().clone()
    }

    fn messages_for(&self, connection_id: &str) -> Vec<ServerMessage> {
        self.all()
            .into_iter()
            .filter(|(targets, _)| targets.iter().any(|t| t == connection_id))
            .map(|(_, msg)| msg)
            .collect()
    }

    fn last_for(&self, connection_id: &str) -> ServerMessage {
        self.messages_for(connection_id)
            .pop()
            .expect("no message for connection")
    }

    fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl DeliveryGateway for RecordingGateway {
    async fn post_to_connections(
        &self,
        connection_ids: &[String],
        message: &ServerMessage,
    ) -> DeliveryReport {
        self.sent
            .lock()
            .unwrap()
            .push((connection_ids.to_vec(), message.clone()));
        DeliveryReport {
            delivered: connection_ids.len(),
            ..Default::default()
        }
    }
}

/// Room store whose backend is down
struct UnavailableRoomStore;

fn unavailable() -> StoreError {
    StoreError::Unavailable("Circuit breaker is open".to_string())
}

#[async_trait]
impl RoomStore for UnavailableRoomStore {
    fn backend_type(&self) -> StoreBackend {
        StoreBackend::Redis
    }

    async fn get(&self, _room_id: &str) -> Result<Option<Room>, StoreError> {
        Err(unavailable())
    }

    async fn put_if_absent(&self, _room: &Room) -> Result<PutOutcome, StoreError> {
        Err(unavailable())
    }

    async fn append_member(
        &self,
        _room_id: &str,
        _member: &Member,
    ) -> Result<AppendOutcome, StoreError> {
        Err(unavailable())
    }

    async fn remove_member(
        &self,
        _room_id: &str,
        _connection_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        Err(unavailable())
    }

    async fn delete_if_version(
        &self,
        _room_id: &str,
        _expected_version: u64,
    ) -> Result<DeleteOutcome, StoreError> {
        Err(unavailable())
    }

    async fn room_count(&self) -> Result<usize, StoreError> {
        Err(unavailable())
    }
}

/// Memory store where another writer commits just before every delete, and
/// optionally before every removal. A visitor comes and goes ahead of each
/// delete so the version read is always stale; a newcomer joins ahead of
/// each removal.
#[derive(Default)]
struct ChurningRoomStore {
    inner: MemoryRoomStore,
    writes: AtomicUsize,
    join_before_removal: bool,
}

impl ChurningRoomStore {
    fn new(join_before_removal: bool) -> Self {
        Self {
            join_before_removal,
            ..Default::default()
        }
    }

    fn next_id(&self) -> String {
        format!("churn-{}", self.writes.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl RoomStore for ChurningRoomStore {
    fn backend_type(&self) -> StoreBackend {
        self.inner.backend_type()
    }

    async fn get(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        self.inner.get(room_id).await
    }

    async fn put_if_absent(&self, room: &Room) -> Result<PutOutcome, StoreError> {
        self.inner.put_if_absent(room).await
    }

    async fn append_member(
        &self,
        room_id: &str,
        member: &Member,
    ) -> Result<AppendOutcome, StoreError> {
        self.inner.append_member(room_id, member).await
    }

    async fn remove_member(
        &self,
        room_id: &str,
        connection_id: &str,
    ) -> Result<RemoveOutcome, StoreError> {
        if self.join_before_removal {
            let id = self.next_id();
            self.inner
                .append_member(room_id, &Member::new("Newcomer", id))
                .await?;
        }
        self.inner.remove_member(room_id, connection_id).await
    }

    async fn delete_if_version(
        &self,
        room_id: &str,
        expected_version: u64,
    ) -> Result<DeleteOutcome, StoreError> {
        let id = self.next_id();
        self.inner
            .append_member(room_id, &Member::new("Visitor", id.as_str()))
            .await?;
        self.inner.remove_member(room_id, &id).await?;
        self.inner.delete_if_version(room_id, expected_version).await
    }

    async fn room_count(&self) -> Result<usize, StoreError> {
        self.inner.room_count().await
    }
}

/// Registry that cannot record room assignments
struct AssignFailsRegistry(MemoryConnectionRegistry);

#[async_trait]
impl ConnectionRegistry for AssignFailsRegistry {
    fn backend_type(&self) -> StoreBackend {
        self.0.backend_type()
    }

    fn server_id(&self) -> &str {
        self.0.server_id()
    }

    async fn put(&self, record: &ConnectionRecord) -> Result<(), StoreError> {
        self.0.put(record).await
    }

    async fn get(&self, connection_id: &str) -> Result<Option<ConnectionRecord>, StoreError> {
        self.0.get(connection_id).await
    }

    async fn assign_room(
        &self,
        _connection_id: &str,
        _room_id: &str,
        _display_name: &str,
    ) -> Result<(), StoreError> {
        Err(unavailable())
    }

    async fn delete(&self, connection_id: &str) -> Result<bool, StoreError> {
        self.0.delete(connection_id).await
    }

    async fn connection_count(&self) -> Result<usize, StoreError> {
        self.0.connection_count().await
    }
}

struct TestEnvironment {
    coordinator: RoomCoordinator,
    gateway: Arc<RecordingGateway>,
}

fn create_test_environment() -> TestEnvironment {
    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = RoomCoordinator::new(
        Arc::new(MemoryRoomStore::new()),
        Arc::new(MemoryConnectionRegistry::new("pwf-test")),
        gateway.clone(),
        RoomConfig::default(),
    );
    TestEnvironment {
        coordinator,
        gateway,
    }
}

async fn create_room(env: &TestEnvironment, name: &str, connection_id: &str) -> String {
    env.coordinator
        .handle_join(JoinRequest::create(name, connection_id))
        .await
        .unwrap()
        .room_id
}

async fn join_room(env: &TestEnvironment, name: &str, room_id: &str, connection_id: &str) {
    env.coordinator
        .handle_join(JoinRequest::join(name, room_id, connection_id))
        .await
        .unwrap();
}

fn as_set(ids: &[String]) -> HashSet<String> {
    ids.iter().cloned().collect()
}

// ============================================================================
// Create / Join
// ============================================================================

#[tokio::test]
async fn test_creator_is_sole_member_and_gets_code() {
    let env = create_test_environment();
    env.coordinator.register_connection("a").await.unwrap();

    let outcome = env
        .coordinator
        .handle_join(JoinRequest::create("Alice", "a"))
        .await
        .unwrap();
    assert!(outcome.audience.is_empty());

    let room = env.coordinator.rooms().get(&outcome.room_id).await.unwrap().unwrap();
    assert_eq!(room.members, vec![Member::new("Alice", "a")]);

    assert_eq!(
        env.gateway.last_for("a"),
        ServerMessage::membership(codes::CREATE_ROOM, "a", outcome.room_id.as_str())
    );

    let record = env.coordinator.registry().get("a").await.unwrap().unwrap();
    assert_eq!(record.room_id.as_deref(), Some(outcome.room_id.as_str()));
    assert_eq!(record.display_name.as_deref(), Some("Alice"));
}

#[tokio::test]
async fn test_join_broadcast_reaches_exactly_prior_members() {
    let env = create_test_environment();
    let room_id = create_room(&env, "Alice", "a").await;
    join_room(&env, "Bob", &room_id, "b").await;
    env.gateway.clear();

    let outcome = env
        .coordinator
        .handle_join(JoinRequest::join("Carol", room_id.as_str(), "c"))
        .await
        .unwrap();
    assert_eq!(as_set(&outcome.audience), as_set(&["a".to_string(), "b".to_string()]));

    let sent = env.gateway.all();
    let broadcasts: Vec<_> = sent
        .iter()
        .filter(|(_, msg)| *msg == ServerMessage::new_player("Carol"))
        .collect();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(as_set(&broadcasts[0].0), as_set(&outcome.audience));

    // The joiner is never told about itself
    assert_eq!(
        env.gateway.messages_for("c"),
        vec![ServerMessage::membership(codes::JOIN_ROOM, "c", room_id.as_str())]
    );
}

#[tokio::test]
async fn test_join_missing_room_is_invalid_room() {
    let env = create_test_environment();
    env.coordinator.register_connection("c").await.unwrap();

    let err = env
        .coordinator
        .handle_join(JoinRequest::join("Carol", "NOPE", "c"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InvalidRoom { .. }));

    // No registry trace and a 400 for the requester
    assert!(env.coordinator.registry().get("c").await.unwrap().is_none());
    assert_eq!(
        env.gateway.last_for("c"),
        ServerMessage::failure(400, codes::INVALID_ROOM, "Invalid Room Code Provided")
    );
}

#[tokio::test]
async fn test_join_without_room_code_is_invalid_room() {
    let env = create_test_environment();
    let request = JoinRequest {
        room_id: None,
        ..JoinRequest::join("Carol", "ignored", "c")
    };

    let err = assert_err!(env.coordinator.handle_join(request).await);
    assert_eq!(err.code(), codes::INVALID_ROOM);
}

#[tokio::test]
async fn test_empty_name_is_invalid_request() {
    let env = create_test_environment();

    let err = assert_err!(env.coordinator.handle_join(JoinRequest::create("  ", "a")).await);
    assert!(matches!(err, CoordinatorError::InvalidRequest(_)));
    assert_eq!(env.coordinator.rooms().room_count().await.unwrap(), 0);

    match env.gateway.last_for("a") {
        ServerMessage::Response { status, code, .. } => {
            assert_eq!(status, 400);
            assert_eq!(code, codes::INVALID_REQUEST);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

#[tokio::test]
async fn test_membership_stays_unique() {
    let env = create_test_environment();
    let room_one = create_room(&env, "Alice", "a").await;
    let room_two = create_room(&env, "Bob", "b").await;

    // Neither may hold a second seat, in another room or the same one
    let err = assert_err!(
        env.coordinator
            .handle_join(JoinRequest::join("Alice", room_two.as_str(), "a"))
            .await
    );
    assert!(matches!(err, CoordinatorError::AlreadyInRoom { .. }));
    assert_err!(
        env.coordinator
            .handle_join(JoinRequest::join("Bob", room_two.as_str(), "b"))
            .await
    );
    assert_err!(env.coordinator.handle_join(JoinRequest::create("Bob", "b")).await);

    let one = env.coordinator.rooms().get(&room_one).await.unwrap().unwrap();
    let two = env.coordinator.rooms().get(&room_two).await.unwrap().unwrap();
    assert_eq!(one.members, vec![Member::new("Alice", "a")]);
    assert_eq!(two.members, vec![Member::new("Bob", "b")]);
    assert_eq!(env.coordinator.rooms().room_count().await.unwrap(), 2);

    match env.gateway.last_for("b") {
        ServerMessage::Response { status, code, .. } => {
            assert_eq!(status, 409);
            assert_eq!(code, codes::ALREADY_IN_ROOM);
        }
        other => panic!("unexpected message: {:?}", other),
    }
}

// ============================================================================
// Leave / Disconnect
// ============================================================================

#[tokio::test]
async fn test_last_member_deletion_sends_no_broadcast() {
    let env = create_test_environment();
    let room_id = create_room(&env, "Alice", "a").await;
    env.gateway.clear();

    let outcome = env.coordinator.handle_disconnect("a").await.unwrap();
    assert_eq!(outcome, LeaveOutcome::RoomDeleted { room_id: room_id.clone() });

    assert!(env.gateway.all().is_empty());
    assert!(env.coordinator.rooms().get(&room_id).await.unwrap().is_none());
    assert!(env.coordinator.registry().get("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let env = create_test_environment();
    let room_id = create_room(&env, "Alice", "a").await;
    join_room(&env, "Bob", &room_id, "b").await;
    env.gateway.clear();

    let first = env.coordinator.handle_disconnect("b").await.unwrap();
    match first {
        LeaveOutcome::Left { remaining, .. } => assert_eq!(remaining, vec!["a".to_string()]),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let second = env.coordinator.handle_disconnect("b").await.unwrap();
    assert_eq!(second, LeaveOutcome::NotInRoom);

    // One notification for the one removal
    assert_eq!(
        env.gateway.messages_for("a"),
        vec![ServerMessage::removed_player("Bob")]
    );

    let room = env.coordinator.rooms().get(&room_id).await.unwrap().unwrap();
    assert_eq!(room.members, vec![Member::new("Alice", "a")]);
}

#[tokio::test]
async fn test_disconnect_of_unknown_connection() {
    let env = create_test_environment();
    let outcome = assert_ok!(env.coordinator.handle_disconnect("ghost").await);
    assert_eq!(outcome, LeaveOutcome::NotInRoom);
    assert!(env.gateway.all().is_empty());
}

#[tokio::test]
async fn test_disconnect_after_room_vanished() {
    let env = create_test_environment();
    let room_id = create_room(&env, "Alice", "a").await;

    // Another instance deleted the room in the meantime
    let room = env.coordinator.rooms().get(&room_id).await.unwrap().unwrap();
    env.coordinator
        .rooms()
        .delete_if_version(&room_id, room.version)
        .await
        .unwrap();

    let outcome = env.coordinator.handle_disconnect("a").await.unwrap();
    assert_eq!(outcome, LeaveOutcome::AlreadyGone { room_id });
    assert!(env.coordinator.registry().get("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_leave_keeps_connection_usable() {
    let env = create_test_environment();
    let room_id = create_room(&env, "Alice", "a").await;
    join_room(&env, "Bob", &room_id, "b").await;

    let outcome = env.coordinator.leave("b").await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Left { .. }));
    assert_eq!(
        env.gateway.last_for("b"),
        ServerMessage::membership(codes::LEAVE_ROOM, "b", room_id.as_str())
    );
    assert_eq!(env.gateway.last_for("a"), ServerMessage::removed_player("Bob"));

    // Still registered, no longer seated
    let record = env.coordinator.registry().get("b").await.unwrap().unwrap();
    assert!(record.room_id.is_none());

    let new_room = create_room(&env, "Bob", "b").await;
    assert_ne!(new_room, room_id);
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_store_outage_is_internal_error() {
    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = RoomCoordinator::new(
        Arc::new(UnavailableRoomStore),
        Arc::new(MemoryConnectionRegistry::new("pwf-test")),
        gateway.clone(),
        RoomConfig::default(),
    );

    let err = coordinator
        .handle_join(JoinRequest::create("Alice", "a"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InternalError(_)));

    match gateway.last_for("a") {
        ServerMessage::Response { status, code, data } => {
            assert_eq!(status, 500);
            assert_eq!(code, codes::INTERNAL_ERROR);
            // Backend detail stays in the logs
            match data {
                ResponseData::Failure { message } => assert!(!message.contains("Circuit")),
                other => panic!("unexpected data: {:?}", other),
            }
        }
        other => panic!("unexpected message: {:?}", other),
    }
    assert_eq!(coordinator.stats().failed_requests, 1);
}

#[tokio::test]
async fn test_disconnect_with_store_down_still_clears_registry() {
    let registry = Arc::new(MemoryConnectionRegistry::new("pwf-test"));
    registry
        .put(&ConnectionRecord::new("a", registry.server_id()))
        .await
        .unwrap();
    registry.assign_room("a", "ROOM1", "Alice").await.unwrap();

    let coordinator = RoomCoordinator::new(
        Arc::new(UnavailableRoomStore),
        registry.clone(),
        Arc::new(RecordingGateway::default()),
        RoomConfig::default(),
    );

    let err = assert_err!(coordinator.handle_disconnect("a").await);
    assert!(matches!(err, CoordinatorError::InternalError(_)));
    assert!(registry.get("a").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_registry_update_rolls_back_join() {
    let gateway = Arc::new(RecordingGateway::default());
    let rooms = Arc::new(MemoryRoomStore::new());
    rooms
        .put_if_absent(&Room::new("ROOM1", Member::new("Alice", "a")))
        .await
        .unwrap();

    let coordinator = RoomCoordinator::new(
        rooms.clone(),
        Arc::new(AssignFailsRegistry(MemoryConnectionRegistry::new("pwf-test"))),
        gateway.clone(),
        RoomConfig::default(),
    );

    let err = coordinator
        .handle_join(JoinRequest::join("Bob", "ROOM1", "b"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::InternalError(_)));

    // The seat was given back and nobody heard about Bob
    let room = rooms.get("ROOM1").await.unwrap().unwrap();
    assert_eq!(room.members, vec![Member::new("Alice", "a")]);
    assert!(gateway.messages_for("a").is_empty());
}

// ============================================================================
// Contention
// ============================================================================

fn churning_environment(
    join_before_removal: bool,
) -> (RoomCoordinator, Arc<ChurningRoomStore>, Arc<RecordingGateway>) {
    let rooms = Arc::new(ChurningRoomStore::new(join_before_removal));
    let gateway = Arc::new(RecordingGateway::default());
    let coordinator = RoomCoordinator::new(
        rooms.clone(),
        Arc::new(MemoryConnectionRegistry::new("pwf-test")),
        gateway.clone(),
        RoomConfig {
            retry_base_delay_ms: 0,
            ..Default::default()
        },
    );
    (coordinator, rooms, gateway)
}

#[tokio::test]
async fn test_disconnect_wins_against_steady_joins() {
    let (coordinator, rooms, gateway) = churning_environment(true);
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;
    coordinator
        .create_or_join(&JoinRequest::join("Bob", room_id.as_str(), "bob"))
        .await
        .unwrap();
    gateway.clear();

    let outcome = coordinator.handle_disconnect("bob").await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Left { .. }), "{:?}", outcome);

    let room = rooms.get(&room_id).await.unwrap().unwrap();
    assert!(!room.contains("bob"));
    assert!(coordinator.registry().get("bob").await.unwrap().is_none());
    assert_eq!(gateway.last_for("host"), ServerMessage::removed_player("Bob"));

    // Nothing left behind for a second disconnect to find
    assert_eq!(
        coordinator.handle_disconnect("bob").await.unwrap(),
        LeaveOutcome::NotInRoom
    );
}

#[tokio::test]
async fn test_sole_member_leaves_despite_version_churn() {
    let (coordinator, rooms, gateway) = churning_environment(false);
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;
    gateway.clear();

    // Every conditional delete loses; the removal by connection id still
    // empties and deletes the room
    let outcome = coordinator.handle_disconnect("host").await.unwrap();
    assert_eq!(outcome, LeaveOutcome::RoomDeleted { room_id: room_id.clone() });
    assert!(rooms.get(&room_id).await.unwrap().is_none());
    assert!(gateway.all().is_empty());
}

#[tokio::test]
async fn test_explicit_leave_under_contention() {
    let (coordinator, rooms, gateway) = churning_environment(true);
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;
    coordinator
        .create_or_join(&JoinRequest::join("Bob", room_id.as_str(), "bob"))
        .await
        .unwrap();

    assert_ok!(coordinator.leave("bob").await);
    assert_eq!(
        gateway.last_for("bob"),
        ServerMessage::membership(codes::LEAVE_ROOM, "bob", room_id.as_str())
    );

    let room = rooms.get(&room_id).await.unwrap().unwrap();
    assert!(!room.contains("bob"));
    let record = coordinator.registry().get("bob").await.unwrap().unwrap();
    assert!(record.room_id.is_none());
}
