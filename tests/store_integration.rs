//! Concurrency tests for room membership
//!
//! Run on the multi-threaded runtime so store writers really overlap.

use std::collections::HashSet;
use std::sync::Arc;

use pwf_room_service::config::RoomConfig;
use pwf_room_service::coordinator::{JoinRequest, LeaveOutcome, RoomCoordinator};
use pwf_room_service::gateway::LocalGateway;
use pwf_room_service::connection_manager::ConnectionManager;
use pwf_room_service::registry::MemoryConnectionRegistry;
use pwf_room_service::room::{AppendOutcome, DeleteOutcome, Member, MemoryRoomStore, Room, RoomStore};

fn coordinator() -> Arc<RoomCoordinator> {
    Arc::new(RoomCoordinator::new(
        Arc::new(MemoryRoomStore::new()),
        Arc::new(MemoryConnectionRegistry::new("pwf-test")),
        Arc::new(LocalGateway::new(Arc::new(ConnectionManager::new()))),
        RoomConfig::default(),
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_all_land() {
    let coordinator = coordinator();
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;

    let joiners = 8;
    let mut handles = Vec::new();
    for i in 0..joiners {
        let coordinator = coordinator.clone();
        let room_id = room_id.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("player-{}", i);
            coordinator
                .create_or_join(&JoinRequest::join(format!("Player {}", i), room_id, id))
                .await
        }));
    }

    let mut audience_sizes = HashSet::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        audience_sizes.insert(outcome.audience.len());
    }

    // Every joiner saw exactly the members committed before it
    let expected: HashSet<usize> = (1..=joiners).collect();
    assert_eq!(audience_sizes, expected);

    let room = coordinator.rooms().get(&room_id).await.unwrap().unwrap();
    assert_eq!(room.members.len(), joiners + 1);
    let unique: HashSet<_> = room.members.iter().map(|m| m.connection_id.clone()).collect();
    assert_eq!(unique.len(), room.members.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_disconnects_converge() {
    let coordinator = coordinator();
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;
    for i in 0..7 {
        coordinator
            .create_or_join(&JoinRequest::join(
                format!("Player {}", i),
                room_id.as_str(),
                format!("player-{}", i),
            ))
            .await
            .unwrap();
    }

    // Six leave at once; every lost version race is a removal that won
    let mut handles = Vec::new();
    for i in 0..6 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.handle_disconnect(&format!("player-{}", i)).await
        }));
    }
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(matches!(outcome, LeaveOutcome::Left { .. }), "{:?}", outcome);
    }

    let room = coordinator.rooms().get(&room_id).await.unwrap().unwrap();
    let ids: Vec<_> = room.members.iter().map(|m| m.connection_id.as_str()).collect();
    assert_eq!(ids, vec!["host", "player-6"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_two_leave_together() {
    let coordinator = coordinator();
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Alice", "a"))
        .await
        .unwrap()
        .room_id;
    coordinator
        .create_or_join(&JoinRequest::join("Bob", room_id.as_str(), "b"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        coordinator.handle_disconnect("a"),
        coordinator.handle_disconnect("b")
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    // Exactly one of them saw the room emptied
    let deleted = outcomes
        .iter()
        .filter(|o| matches!(o, LeaveOutcome::RoomDeleted { .. }))
        .count();
    assert_eq!(deleted, 1);
    assert!(coordinator.rooms().get(&room_id).await.unwrap().is_none());
    assert_eq!(coordinator.rooms().room_count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_appends_are_serialized() {
    let store = Arc::new(MemoryRoomStore::new());
    store
        .put_if_absent(&Room::new("RACE", Member::new("Host", "host")))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .append_member("RACE", &Member::new(format!("P{}", i), format!("p{}", i)))
                .await
        }));
    }

    let mut versions = HashSet::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AppendOutcome::Appended { previous, version } => {
                // Version counts committed writes
                assert_eq!(version as usize, previous.len() + 1);
                versions.insert(version);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    assert_eq!(versions.len(), 16);

    let room = store.get("RACE").await.unwrap().unwrap();
    assert_eq!(room.members.len(), 17);
    assert_eq!(room.version, 17);
}

#[tokio::test]
async fn test_sole_member_delete_checks_version() {
    let store = MemoryRoomStore::new();
    store
        .put_if_absent(&Room::new("R1", Member::new("Alice", "a")))
        .await
        .unwrap();
    store.append_member("R1", &Member::new("Bob", "b")).await.unwrap();
    store.remove_member("R1", "b").await.unwrap();

    // Alice is alone again, but not at the version first read
    let outcome = store.delete_if_version("R1", 1).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::ConditionFailed { current_version: 3 });
    assert_eq!(store.delete_if_version("R1", 3).await.unwrap(), DeleteOutcome::Deleted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_during_join_storm() {
    let coordinator = coordinator();
    let room_id = coordinator
        .create_or_join(&JoinRequest::create("Host", "host"))
        .await
        .unwrap()
        .room_id;
    coordinator
        .create_or_join(&JoinRequest::join("Bob", room_id.as_str(), "bob"))
        .await
        .unwrap();

    let mut joins = Vec::new();
    for i in 0..32 {
        let coordinator = coordinator.clone();
        let room_id = room_id.clone();
        joins.push(tokio::spawn(async move {
            coordinator
                .create_or_join(&JoinRequest::join(format!("P{}", i), room_id, format!("p{}", i)))
                .await
        }));
    }
    let outcome = coordinator.handle_disconnect("bob").await.unwrap();
    assert!(matches!(outcome, LeaveOutcome::Left { .. }), "{:?}", outcome);
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let room = coordinator.rooms().get(&room_id).await.unwrap().unwrap();
    assert!(!room.contains("bob"));
    assert_eq!(room.members.len(), 33);
}
