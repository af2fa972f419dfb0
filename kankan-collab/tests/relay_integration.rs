//! Integration tests over a real relay.
//!
//! These tests start a relay on an ephemeral port and connect peers through
//! WebSockets, verifying that rooms, targeted actions and full board sync
//! work end to end.

use std::sync::Arc;

use kankan_collab::config::{RelayConfig, StoreConfig, SyncConfig};
use kankan_collab::registry::SessionRegistry;
use kankan_collab::server::RelayServer;
use kankan_collab::storage::BoardStore;
use kankan_collab::transport::{RelayTransport, RoomEvent, RoomHandle, Transport};
use kankan_core::CardDraft;
use tempfile::{tempdir, TempDir};
use tokio::time::{sleep, timeout, Duration};

/// Start a relay on a free port, return its URL.
async fn start_relay() -> String {
    let server = RelayServer::bind(RelayConfig::for_testing()).await.unwrap();
    let url = server.url().unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    url
}

async fn next_event(handle: &mut RoomHandle) -> RoomEvent {
    timeout(Duration::from_secs(2), handle.events.recv())
        .await
        .expect("event within timeout")
        .expect("room stream open")
}

#[tokio::test]
async fn test_relay_announces_members() {
    let url = start_relay().await;
    let alice = RelayTransport::connect(&url).await.unwrap();
    let bob = RelayTransport::connect(&url).await.unwrap();

    let mut a = alice.join("wf-kanban", "board-1").unwrap();
    // Let the relay register Alice before Bob arrives.
    sleep(Duration::from_millis(50)).await;
    let mut b = bob.join("wf-kanban", "board-1").unwrap();

    assert_eq!(next_event(&mut a).await, RoomEvent::PeerJoined(bob.peer_id()));
    assert_eq!(next_event(&mut b).await, RoomEvent::PeerJoined(alice.peer_id()));

    b.link.leave();
    assert_eq!(next_event(&mut a).await, RoomEvent::PeerLeft(bob.peer_id()));
}

#[tokio::test]
async fn test_relay_routes_actions() {
    let url = start_relay().await;
    let alice = RelayTransport::connect(&url).await.unwrap();
    let bob = RelayTransport::connect(&url).await.unwrap();
    let carol = RelayTransport::connect(&url).await.unwrap();

    let mut a = alice.join("wf-kanban", "room").unwrap();
    sleep(Duration::from_millis(50)).await;
    let mut b = bob.join("wf-kanban", "room").unwrap();
    sleep(Duration::from_millis(50)).await;
    let mut c = carol.join("wf-kanban", "room").unwrap();
    let mut other = carol.join("wf-kanban", "elsewhere").unwrap();
    sleep(Duration::from_millis(100)).await;
    while a.events.try_recv().is_ok() {}
    while b.events.try_recv().is_ok() {}
    while c.events.try_recv().is_ok() {}

    // Targeted: only Bob hears it.
    a.link.send(Some(bob.peer_id()), "vector", r#"{"payload":""}"#);
    match next_event(&mut b).await {
        RoomEvent::Message { from, action, body } => {
            assert_eq!(from, alice.peer_id());
            assert_eq!(action, "vector");
            assert_eq!(body, r#"{"payload":""}"#);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Broadcast: everyone but the sender, and only in this room.
    a.link.send(None, "update", r#"{"payload":"AAA="}"#);
    assert!(matches!(next_event(&mut b).await, RoomEvent::Message { .. }));
    assert!(matches!(next_event(&mut c).await, RoomEvent::Message { .. }));
    sleep(Duration::from_millis(50)).await;
    assert!(a.events.try_recv().is_err());
    assert!(other.events.try_recv().is_err());
}

struct Device {
    _dir: TempDir,
    registry: SessionRegistry,
}

async fn device(url: &str) -> Device {
    let dir = tempdir().unwrap();
    let config = StoreConfig::for_testing(dir.path().join("db"));
    let store = Arc::new(BoardStore::open(config).unwrap());
    let transport = RelayTransport::connect(url).await.unwrap();
    let registry = SessionRegistry::new(SyncConfig::default(), store, Arc::new(transport));
    Device { _dir: dir, registry }
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_boards_sync_through_relay() {
    let url = start_relay().await;
    let alice = device(&url).await;
    let bob = device(&url).await;

    let (entry, board_a) = alice.registry.create_board("Over the wire").await.unwrap();
    let backlog = board_a.projection().columns[0].id.clone();
    board_a
        .document()
        .create_card(
            &backlog,
            &CardDraft {
                title: "Before Bob".to_string(),
                ..CardDraft::default()
            },
        )
        .unwrap();

    let board_b = bob.registry.join_board_by_id(&entry.id).await.unwrap();
    eventually("initial state on bob", || board_b.summary().card_count == 1).await;
    eventually("name on bob", || {
        bob.registry.board(&entry.id).is_some_and(|e| e.name == "Over the wire")
    })
    .await;

    board_b
        .document()
        .create_card(
            &backlog,
            &CardDraft {
                title: "From Bob".to_string(),
                tag: "relay".to_string(),
                ..CardDraft::default()
            },
        )
        .unwrap();
    eventually("bob's card on alice", || board_a.summary().card_count == 2).await;

    let projection = board_a.projection();
    let cards = &projection.columns[0].cards;
    assert_eq!(cards[1].title, "From Bob");
    assert_eq!(cards[1].tag.as_deref(), Some("relay"));
    assert_eq!(board_a.peer_count(), 1);
}
