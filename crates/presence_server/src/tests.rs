//! Cross-component scenarios driven through the lifecycle manager with
//! in-memory mailboxes, plus a socket-level smoke test of the server.

use crate::auth::{DirectoryUser, StaticDirectory, VerifiedIdentity};
use crate::chat::{ChatRelay, InMemoryChatStore};
use crate::config::{ServerConfig, SpaceConfig};
use crate::connection::{ConnectionManager, ConnectionSession, Frame};
use crate::health::ServerStats;
use crate::lifecycle::LifecycleManager;
use crate::presence::{MemoryPresenceStore, PresenceStore};
use crate::routing::{LocalBroadcaster, RoomRouter};
use crate::spatial::{MeetingZone, ZoneRegion};
use crate::error::PresenceError;
use crate::types::{ConnectionId, PositionUpdate, PresenceRecord, SpaceId};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;

struct Office {
    lifecycle: LifecycleManager,
    presence: Arc<dyn PresenceStore>,
    chat_store: Arc<InMemoryChatStore>,
}

struct Client {
    session: ConnectionSession,
    rx: mpsc::UnboundedReceiver<Frame>,
}

fn zone(room_id: &str, min_x: f64, max_x: f64) -> MeetingZone {
    MeetingZone {
        room_id: room_id.to_string(),
        region: ZoneRegion { min_x, max_x, min_z: 10.0, max_z: 20.0 },
    }
}

fn office_config() -> ServerConfig {
    ServerConfig {
        spaces: vec![
            SpaceConfig {
                id: "hq".into(),
                organization: Some("acme".into()),
                bounds: None,
                zones: vec![zone("room1", 10.0, 20.0), zone("room2", 21.0, 30.0)],
            },
            SpaceConfig {
                id: "annex".into(),
                organization: Some("acme".into()),
                bounds: None,
                zones: Vec::new(),
            },
        ],
        ..ServerConfig::default()
    }
}

fn directory() -> StaticDirectory {
    let user = |id: &str, org: &str| DirectoryUser {
        user_id: id.into(),
        token: format!("tok-{id}"),
        display_name: Some(id.to_uppercase()),
        organizations: vec![org.to_string()],
    };
    StaticDirectory::new(vec![
        user("alice", "acme"),
        user("bob", "acme"),
        user("carol", "acme"),
        user("dave", "acme"),
        user("eve", "evil"),
    ])
    .with_space_owner("hq".into(), "acme")
    .with_space_owner("annex".into(), "acme")
}

fn office() -> Office {
    office_with(Arc::new(MemoryPresenceStore::new()))
}

fn office_with(presence: Arc<dyn PresenceStore>) -> Office {
    let config = office_config();
    let connections = Arc::new(ConnectionManager::new());
    let broadcaster = Arc::new(LocalBroadcaster::new(connections.clone()));
    let chat_store = Arc::new(InMemoryChatStore::default());
    let router = Arc::new(RoomRouter::new(
        presence.clone(),
        broadcaster.clone(),
        Arc::new(config.catalog()),
    ));
    let chat = Arc::new(ChatRelay::new(
        Arc::new(directory()),
        chat_store.clone(),
        broadcaster,
        config.chat.max_content_chars,
    ));
    let lifecycle = LifecycleManager::new(connections, router, chat, Arc::new(ServerStats::default()));
    Office {
        lifecycle,
        presence,
        chat_store,
    }
}

impl Office {
    fn connect(&self, user: &str) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = VerifiedIdentity {
            user_id: user.into(),
            display_name: Some(user.to_uppercase()),
        };
        let session = self
            .lifecycle
            .open_session(identity, "127.0.0.1:5000".parse().unwrap(), tx);
        Client { session, rx }
    }

    async fn send(&self, client: &mut Client, event: Value) {
        self.lifecycle.handle_frame(&mut client.session, &event.to_string()).await;
    }

    async fn join(&self, client: &mut Client, space: &str, x: f64, z: f64) {
        self.send(
            client,
            json!({"event": "join_space", "data": {"spaceId": space, "x": x, "y": 0.0, "z": z, "direction": "down"}}),
        )
        .await;
    }

    async fn walk(&self, client: &mut Client, space: &str, x: f64, z: f64) {
        self.send(
            client,
            json!({"event": "move", "data": {"spaceId": space, "x": x, "y": 0.0, "z": z, "direction": "right"}}),
        )
        .await;
    }

    async fn members(&self, space: &str) -> usize {
        self.presence
            .list_by_space(&SpaceId::from(space))
            .await
            .unwrap()
            .len()
    }

    async fn holds(&self, space: &str, client: &Client) -> bool {
        self.presence
            .list_by_space(&SpaceId::from(space))
            .await
            .unwrap()
            .iter()
            .any(|record| record.connection_id == client.session.connection_id)
    }
}

/// Memory store whose writes can be held until released, to interrupt a
/// handler part way through.
struct GatedStore {
    inner: MemoryPresenceStore,
    hold_upserts: AtomicBool,
    hold_removes: AtomicBool,
    gate: Semaphore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemoryPresenceStore::new(),
            hold_upserts: AtomicBool::new(false),
            hold_removes: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    async fn pass(&self, held: &AtomicBool) {
        if held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl PresenceStore for GatedStore {
    fn backend_name(&self) -> &'static str {
        "gated"
    }

    async fn upsert(&self, space_id: &SpaceId, id: ConnectionId, record: PresenceRecord) -> Result<(), PresenceError> {
        self.pass(&self.hold_upserts).await;
        self.inner.upsert(space_id, id, record).await
    }

    async fn remove(&self, space_id: &SpaceId, id: ConnectionId) -> Result<Option<PresenceRecord>, PresenceError> {
        self.pass(&self.hold_removes).await;
        self.inner.remove(space_id, id).await
    }

    async fn list_by_space(&self, space_id: &SpaceId) -> Result<Vec<PresenceRecord>, PresenceError> {
        self.inner.list_by_space(space_id).await
    }

    async fn update_position(
        &self,
        space_id: &SpaceId,
        id: ConnectionId,
        update: PositionUpdate,
    ) -> Result<Option<PresenceRecord>, PresenceError> {
        self.inner.update_position(space_id, id, update).await
    }
}

/// Runs a frame but abandons it if it has not finished within a short wait.
async fn interrupted(office: &Office, client: &mut Client, event: Value) {
    let frame = event.to_string();
    let handled = office.lifecycle.handle_frame(&mut client.session, &frame);
    assert!(timeout(Duration::from_millis(50), handled).await.is_err());
}

impl Client {
    fn drain(&mut self) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    fn names(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .map(|e| e["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[tokio::test]
async fn join_then_move_reaches_the_other_member() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");

    office.join(&mut alice, "hq", 0.0, 0.0).await;
    office.join(&mut bob, "hq", 1.0, 1.0).await;
    assert_eq!(alice.names(), vec!["space_state", "user_joined"]);
    let roster = bob.drain();
    assert_eq!(roster[0]["data"]["users"][0]["displayName"], "ALICE");

    office.walk(&mut alice, "hq", 5.0, 6.0).await;
    let moved = bob.drain();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0]["event"], "user_moved");
    assert_eq!(moved[0]["data"]["userId"], "alice");
    assert_eq!(moved[0]["data"]["x"], 5.0);
    assert_eq!(moved[0]["data"]["z"], 6.0);
    assert_eq!(moved[0]["data"]["direction"], "right");
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn moves_reach_every_member_but_the_sender() {
    let office = office();
    let mut clients: Vec<Client> = ["alice", "bob", "carol", "dave"]
        .iter()
        .map(|user| office.connect(user))
        .collect();
    for client in clients.iter_mut() {
        office.join(client, "hq", 0.0, 0.0).await;
    }
    for client in clients.iter_mut() {
        client.drain();
    }

    office.walk(&mut clients[0], "hq", 3.0, 3.0).await;
    let received: Vec<usize> = clients.iter_mut().map(|c| c.drain().len()).collect();
    assert_eq!(received, vec![0, 1, 1, 1]);
}

#[tokio::test]
async fn spaces_do_not_leak_into_each_other() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut carol = office.connect("carol");
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    office.join(&mut carol, "annex", 0.0, 0.0).await;
    carol.drain();

    office.walk(&mut alice, "hq", 1.0, 1.0).await;
    office
        .send(
            &mut alice,
            json!({"event": "chat_message", "data": {"channelType": "SPACE", "channelId": "hq", "content": "hq only"}}),
        )
        .await;
    assert!(carol.drain().is_empty());

    // A move addressed to a space the sender is not in is dropped.
    office.walk(&mut carol, "hq", 2.0, 2.0).await;
    assert_eq!(alice.names(), vec!["space_state", "chat_message"]);
}

#[tokio::test]
async fn a_connection_occupies_one_space_at_a_time() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    bob.drain();

    office.join(&mut alice, "annex", 0.0, 0.0).await;
    assert_eq!(office.members("hq").await, 1);
    assert_eq!(office.members("annex").await, 1);
    assert_eq!(alice.session.current_space(), Some(&SpaceId::from("annex")));

    let left = bob.drain();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0]["event"], "user_left");
    assert_eq!(left[0]["data"]["connectionId"], alice.session.connection_id.to_string());
}

#[tokio::test]
async fn disconnect_cleans_up_exactly_once() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    office
        .send(&mut alice, json!({"event": "join_dm", "data": {"otherUserId": "bob"}}))
        .await;
    bob.drain();

    office.lifecycle.disconnect(&mut alice.session).await;
    office.lifecycle.disconnect(&mut alice.session).await;

    assert_eq!(bob.names(), vec!["user_left"]);
    assert_eq!(office.members("hq").await, 1);
    assert_eq!(office.lifecycle.connections().connection_count(), 1);
    assert!(alice.session.direct_channels.is_empty());

    // Events after disconnect are ignored.
    office.walk(&mut alice, "hq", 1.0, 1.0).await;
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn zone_crossings_emit_enter_and_exit_only_on_change() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut alice, "hq", 0.0, 15.0).await;
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    alice.drain();
    bob.drain();

    for x in [5.0, 12.0, 15.0, 18.0] {
        office.walk(&mut alice, "hq", x, 15.0).await;
    }
    // Straight from room1 into room2.
    office.walk(&mut alice, "hq", 25.0, 15.0).await;
    office.walk(&mut alice, "hq", 50.0, 15.0).await;

    let zone_events: Vec<(String, String)> = alice
        .drain()
        .into_iter()
        .map(|e| {
            (
                e["event"].as_str().unwrap_or_default().to_string(),
                e["data"]["roomId"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    assert_eq!(
        zone_events,
        vec![
            ("zone_entered".to_string(), "room1".to_string()),
            ("zone_exited".to_string(), "room1".to_string()),
            ("zone_entered".to_string(), "room2".to_string()),
            ("zone_exited".to_string(), "room2".to_string()),
        ]
    );
    // Zone prompts are private to the mover.
    assert!(bob.names().iter().all(|name| name == "user_moved"));
}

#[tokio::test]
async fn joining_inside_a_zone_sets_the_baseline_silently() {
    let office = office();
    let mut alice = office.connect("alice");
    office.join(&mut alice, "hq", 15.0, 15.0).await;
    assert_eq!(alice.names(), vec!["space_state"]);
    assert_eq!(alice.session.zone.as_deref(), Some("room1"));

    office.walk(&mut alice, "hq", 16.0, 15.0).await;
    assert!(alice.drain().is_empty());

    office
        .send(&mut alice, json!({"event": "leave_space", "data": {"spaceId": "hq"}}))
        .await;
    assert_eq!(alice.names(), vec!["zone_exited"]);
    assert_eq!(alice.session.zone, None);
}

#[tokio::test]
async fn rejoining_the_same_space_keeps_the_zone_baseline() {
    let office = office();
    let mut alice = office.connect("alice");
    office.join(&mut alice, "hq", 15.0, 15.0).await;
    alice.drain();

    office.join(&mut alice, "hq", 15.0, 15.0).await;
    assert_eq!(alice.names(), vec!["space_state"]);
    assert_eq!(alice.session.zone.as_deref(), Some("room1"));

    office.walk(&mut alice, "hq", 16.0, 15.0).await;
    assert!(alice.drain().is_empty());

    office.join(&mut alice, "hq", 0.0, 0.0).await;
    assert_eq!(alice.names(), vec!["space_state", "zone_exited"]);
    assert_eq!(alice.session.zone, None);
}

#[tokio::test]
async fn disconnect_after_leaving_announces_nothing_more() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    bob.drain();

    office
        .send(&mut alice, json!({"event": "leave_space", "data": {"spaceId": "hq"}}))
        .await;
    office.lifecycle.disconnect(&mut alice.session).await;

    assert_eq!(bob.names(), vec!["user_left"]);
    assert_eq!(office.members("hq").await, 1);
    assert!(!office.holds("hq", &alice).await);
}

#[tokio::test]
async fn disconnect_during_a_leave_still_clears_the_record() {
    let store = Arc::new(GatedStore::new());
    let office = office_with(store.clone());
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    bob.drain();

    store.hold_removes.store(true, Ordering::SeqCst);
    interrupted(
        &office,
        &mut alice,
        json!({"event": "leave_space", "data": {"spaceId": "hq"}}),
    )
    .await;
    office.lifecycle.disconnect(&mut alice.session).await;
    store.release();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(bob.names(), vec!["user_left"]);
    assert_eq!(office.members("hq").await, 1);
    assert!(!office.holds("hq", &alice).await);
}

#[tokio::test]
async fn disconnect_during_a_join_still_clears_the_seat() {
    let store = Arc::new(GatedStore::new());
    let office = office_with(store.clone());
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    bob.drain();

    store.hold_upserts.store(true, Ordering::SeqCst);
    interrupted(
        &office,
        &mut alice,
        json!({"event": "join_space", "data": {"spaceId": "hq", "x": 0.0, "y": 0.0, "z": 0.0, "direction": "down"}}),
    )
    .await;
    office.lifecycle.disconnect(&mut alice.session).await;

    assert_eq!(bob.names(), vec!["user_left"]);
    assert_eq!(office.members("hq").await, 1);
    assert!(!office.holds("hq", &alice).await);
    assert_eq!(office.lifecycle.router().space_of(alice.session.connection_id), None);
}

#[tokio::test]
async fn space_chat_is_limited_to_organization_members() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut eve = office.connect("eve");
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    office.join(&mut eve, "hq", 0.0, 0.0).await;
    alice.drain();
    eve.drain();

    let chat = |content: &str| {
        json!({"event": "chat_message", "data": {"channelType": "SPACE", "channelId": "hq", "content": content}})
    };
    office.send(&mut eve, chat("intruder")).await;
    assert!(alice.drain().is_empty());
    assert!(eve.drain().is_empty());
    assert!(office.chat_store.history("hq").is_empty());

    office.send(&mut alice, chat("welcome")).await;
    let to_eve = eve.drain();
    assert_eq!(to_eve[0]["data"]["content"], "welcome");
    assert_eq!(to_eve[0]["data"]["senderDisplayName"], "ALICE");
    assert_eq!(to_eve[0]["data"]["channelType"], "SPACE");
    assert_eq!(alice.names(), vec!["chat_message"]);

    let snapshot = office.lifecycle.stats().snapshot(0);
    assert_eq!(snapshot.chat_delivered, 1);
    assert_eq!(snapshot.chat_dropped, 1);
}

#[tokio::test]
async fn direct_messages_reach_only_the_pair() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    let mut carol = office.connect("carol");
    office
        .send(&mut alice, json!({"event": "join_dm", "data": {"otherUserId": "bob"}}))
        .await;
    office
        .send(&mut bob, json!({"event": "join_dm", "data": {"otherUserId": "alice"}}))
        .await;
    office
        .send(&mut carol, json!({"event": "join_dm", "data": {"otherUserId": "alice"}}))
        .await;

    office
        .send(
            &mut bob,
            json!({"event": "chat_message", "data": {"channelType": "DM", "channelId": "alice", "content": "hey"}}),
        )
        .await;
    let received = alice.drain();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["data"]["channelId"], "dm:alice:bob");
    assert_eq!(bob.drain().len(), 1);
    assert!(carol.drain().is_empty());

    // Carol cannot post into the alice/bob channel by naming it.
    office
        .send(
            &mut carol,
            json!({"event": "chat_message", "data": {"channelType": "DM", "channelId": "dm:alice:bob", "content": "hi"}}),
        )
        .await;
    assert!(alice.drain().is_empty());
    assert_eq!(office.chat_store.history("dm:alice:bob").len(), 1);
}

#[tokio::test]
async fn oversized_chat_is_truncated_not_rejected() {
    let office = office();
    let mut alice = office.connect("alice");
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    alice.drain();

    let content = "x".repeat(5000);
    office
        .send(
            &mut alice,
            json!({"event": "chat_message", "data": {"channelType": "SPACE", "channelId": "hq", "content": content}}),
        )
        .await;
    let echoed = alice.drain();
    assert_eq!(echoed[0]["data"]["content"].as_str().unwrap().chars().count(), 2000);
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_closing() {
    let office = office();
    let mut alice = office.connect("alice");
    office.lifecycle.handle_frame(&mut alice.session, "{{{").await;
    office
        .send(&mut alice, json!({"event": "move", "data": {"spaceId": "hq"}}))
        .await;
    assert_eq!(office.lifecycle.stats().snapshot(0).events_dropped, 2);

    office.join(&mut alice, "hq", 0.0, 0.0).await;
    assert_eq!(alice.names(), vec!["space_state"]);
}

#[tokio::test]
async fn positions_are_clamped_to_floor_bounds() {
    let office = office();
    let mut alice = office.connect("alice");
    let mut bob = office.connect("bob");
    office.join(&mut alice, "hq", 0.0, 0.0).await;
    office.join(&mut bob, "hq", 0.0, 0.0).await;
    alice.drain();

    office.walk(&mut bob, "hq", 99999.0, -99999.0).await;
    let moved = alice.drain();
    assert_eq!(moved[0]["data"]["x"], 1000.0);
    assert_eq!(moved[0]["data"]["z"], -1000.0);
}

mod socket {
    use crate::auth::{DirectoryUser, StaticDirectory};
    use crate::config::ServerConfig;
    use crate::create_server_with_config;
    use futures_util::{SinkExt, StreamExt};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .map(|addr| addr.port())
            .expect("ephemeral port")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn websocket_round_trip_and_auth_rejection() {
        let port = free_port();
        let config = ServerConfig {
            bind_address: format!("127.0.0.1:{port}").parse().unwrap(),
            ..ServerConfig::default()
        };
        let directory = StaticDirectory::new(vec![DirectoryUser {
            user_id: "alice".into(),
            token: "tok-alice".into(),
            display_name: None,
            organizations: Vec::new(),
        }]);
        let server = Arc::new(create_server_with_config(config, directory).await.unwrap());
        let runner = {
            let server = server.clone();
            tokio::spawn(async move { server.start().await })
        };

        let url = format!("ws://127.0.0.1:{port}/?token=tok-alice");
        let mut attempt = 0;
        let (mut ws, _) = loop {
            match connect_async(url.as_str()).await {
                Ok(connected) => break connected,
                Err(_) if attempt < 50 => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("server never came up: {e}"),
            }
        };

        let join = r#"{"event":"join_space","data":{"spaceId":"hq","x":1,"y":0,"z":1}}"#;
        ws.send(Message::Text(join.to_string().into())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Text(text) = reply else {
            panic!("expected text frame, got {reply:?}");
        };
        let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(value["event"], "space_state");

        let (mut rejected, _) = connect_async(format!("ws://127.0.0.1:{port}/?token=wrong"))
            .await
            .unwrap();
        let closing = tokio::time::timeout(Duration::from_secs(2), rejected.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match closing {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
            other => panic!("expected policy close, got {other:?}"),
        }

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(10), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
