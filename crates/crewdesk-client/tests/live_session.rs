//! Two controllers talking through a real server: REST writes, realtime
//! fan-out over `RealtimeLink`, and the unread ledger in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crewdesk_api::auth::{AppStateInner, create_token};
use crewdesk_api::store::MessageStore;
use crewdesk_client::{ChatApi, HttpChatApi, LinkEvent, Outbox, RealtimeLink, SessionController};
use crewdesk_db::Database;
use crewdesk_gateway::Dispatcher;
use crewdesk_types::api::CreateRoomResponse;
use crewdesk_types::events::{ClientCommand, ServerEvent};
use crewdesk_types::models::{GlobalRole, MessageKind, RoomId};

const SECRET: &str = "client-integration-secret";

struct Peer {
    id: Uuid,
    token: String,
    controller: SessionController<HttpChatApi, RealtimeLink>,
    events: mpsc::Receiver<LinkEvent>,
}

async fn spawn_server() -> (String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("chat.db")).unwrap();
    let state = Arc::new(AppStateInner {
        store: MessageStore::new(Arc::new(db)),
        jwt_secret: SECRET.into(),
        dispatcher: Dispatcher::new(64),
        heartbeat: Duration::from_secs(30),
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, crewdesk_api::router(state)).await.unwrap();
    });
    (format!("http://{addr}"), dir)
}

fn peer(base: &str, name: &str) -> Peer {
    let id = Uuid::new_v4();
    let token = create_token(SECRET, id, name, GlobalRole::Member).unwrap();
    let api = HttpChatApi::new(base, &token);
    let (link, events) = RealtimeLink::spawn(&api.gateway_url(), &token);
    Peer {
        id,
        token,
        controller: SessionController::new(api, link, id),
        events,
    }
}

async fn create_room(base: &str, owner: &Peer, members: &[Uuid]) -> RoomId {
    let resp = reqwest::Client::new()
        .post(format!("{base}/rooms"))
        .bearer_auth(&owner.token)
        .json(&json!({ "workspaceId": null, "name": "launch", "kind": "group", "memberIds": members }))
        .send()
        .await
        .unwrap();
    resp.json::<CreateRoomResponse>().await.unwrap().id
}

async fn next(events: &mut mpsc::Receiver<LinkEvent>) -> LinkEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for link event")
        .expect("link closed")
}

/// Wait until the link is up, then let the controller rejoin its channels.
async fn connect(peer: &mut Peer) {
    loop {
        let event = next(&mut peer.events).await;
        let connected = event == LinkEvent::Connected;
        peer.controller.handle(event, Instant::now()).await.unwrap();
        if connected {
            return;
        }
    }
}

/// Pump events into the controller until `pred` matches one.
async fn pump_until(peer: &mut Peer, pred: impl Fn(&LinkEvent) -> bool) {
    loop {
        let event = next(&mut peer.events).await;
        let hit = pred(&event);
        peer.controller.handle(event, Instant::now()).await.unwrap();
        if hit {
            return;
        }
    }
}

#[tokio::test]
async fn message_flows_between_two_sessions() {
    let (base, _dir) = spawn_server().await;
    let mut ada = peer(&base, "ada");
    let mut bob = peer(&base, "bob");
    let room = create_room(&base, &ada, &[bob.id]).await;

    connect(&mut ada).await;
    connect(&mut bob).await;
    ada.controller.select_room(room);
    bob.controller.select_room(room);
    ada.controller.refresh().await.unwrap();
    bob.controller.refresh().await.unwrap();

    // Joins carry no ack: retry a typing ping until bob sees it, which
    // proves both connections are in the room.
    let bob_sees_typing = |e: &LinkEvent| matches!(e, LinkEvent::Event(ServerEvent::Typing { .. }));
    loop {
        assert!(ada.controller.outbox().send(ClientCommand::Typing { room_id: room, is_typing: true }));
        let seen = tokio::time::timeout(Duration::from_millis(300), pump_until(&mut bob, bob_sees_typing)).await;
        if seen.is_ok() {
            break;
        }
    }
    assert_eq!(bob.controller.typing_names(Instant::now()), ["ada"]);

    let local = ada
        .controller
        .send("hello", MessageKind::Text, None, None)
        .await
        .unwrap();
    let server_id = ada.controller.timeline().server_id(local).unwrap();

    pump_until(&mut bob, |e| matches!(e, LinkEvent::Event(ServerEvent::NewMessage { .. }))).await;
    let seen = bob.controller.timeline().get(server_id).unwrap();
    assert_eq!(seen.content, "hello");
    assert_eq!(seen.sender_id, ada.id);

    // bob is viewing the room, so his counter was reset by the receipt
    assert_eq!(bob.controller.api().unread_total().await.unwrap(), 0);

    ada.controller.edit(server_id, "hello, world").await.unwrap();
    pump_until(&mut bob, |e| matches!(e, LinkEvent::Event(ServerEvent::MessageUpdated { .. }))).await;
    let edited = bob.controller.timeline().get(server_id).unwrap();
    assert_eq!(edited.content, "hello, world");
    assert!(edited.edited);

    ada.controller.delete(server_id).await.unwrap();
    pump_until(&mut bob, |e| matches!(e, LinkEvent::Event(ServerEvent::MessageDeleted { .. }))).await;
    assert!(bob.controller.timeline().get(server_id).is_none());
}

#[tokio::test]
async fn offline_member_catches_up_from_the_ledger() {
    let (base, _dir) = spawn_server().await;
    let mut ada = peer(&base, "ada");
    let cyd_id = Uuid::new_v4();
    let cyd_token = create_token(SECRET, cyd_id, "cyd", GlobalRole::Member).unwrap();
    let room = create_room(&base, &ada, &[cyd_id]).await;

    connect(&mut ada).await;
    ada.controller.select_room(room);
    ada.controller.refresh().await.unwrap();
    ada.controller.send("one", MessageKind::Text, None, None).await.unwrap();
    ada.controller.send("two", MessageKind::Text, None, None).await.unwrap();

    let cyd_api = HttpChatApi::new(&base, &cyd_token);
    assert_eq!(cyd_api.unread_total().await.unwrap(), 2);
    let by_room = cyd_api.unread_by_room().await.unwrap();
    assert_eq!(by_room.len(), 1);
    assert_eq!(by_room[0].room_id, room);

    let history = cyd_api.list_messages(room, 50, 0).await.unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["one", "two"]);

    cyd_api.mark_read(room).await.unwrap();
    assert_eq!(cyd_api.unread_total().await.unwrap(), 0);
    assert_eq!(ada.controller.api().unread_total().await.unwrap(), 0);
}
