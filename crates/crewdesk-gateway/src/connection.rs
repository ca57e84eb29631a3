use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crewdesk_types::events::{ChannelKey, ClientCommand, ServerEvent, TypingUser};

use crate::dispatcher::{ConnectionId, Dispatcher, RoomGate};

/// Identity of one authenticated realtime connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: Uuid,
    pub username: String,
}

/// Drive a pre-authenticated WebSocket until either side goes away.
///
/// The credential was verified at the HTTP upgrade, so the loop starts with a
/// `ready` event. The server pings every `heartbeat`; two missed pongs drop
/// the connection.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    gate: Arc<dyn RoomGate>,
    user_id: Uuid,
    username: String,
    heartbeat: Duration,
) {
    let (conn_id, mut outbound_rx) = dispatcher.connect(user_id).await;
    let session = Session {
        connection_id: conn_id,
        user_id,
        username,
    };

    info!("{} ({}) connected to gateway as {}", session.username, user_id, conn_id);

    let (mut sender, mut receiver) = socket.split();

    let ready = ServerEvent::Ready {
        user_id,
        username: session.username.clone(),
        connection_id: conn_id,
    };
    let ready_sent = match serde_json::to_string(&ready) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    };
    if !ready_sent {
        dispatcher.disconnect(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_dispatcher = dispatcher.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(cmd) => {
                        handle_command(&recv_dispatcher, gate.as_ref(), &recv_session, cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_session.username,
                            recv_session.user_id,
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(conn_id).await;
    info!("{} ({}) disconnected from gateway", session.username, session.user_id);
}

/// Apply one client command to the registry.
///
/// Room-scoped relays require the connection to have joined the room, and
/// message-carrying events must name the connection's own user as sender.
/// A notify only goes to users the gate would admit to that room.
/// Refusals are answered with a `rejected` event to the issuing connection.
pub async fn handle_command(
    dispatcher: &Dispatcher,
    gate: &dyn RoomGate,
    session: &Session,
    cmd: ClientCommand,
) {
    let conn_id = session.connection_id;
    let command = cmd.name();

    match cmd {
        ClientCommand::JoinRoom { room_id } => {
            if !gate.may_join(session.user_id, room_id).await {
                reject(dispatcher, session, command, format!("not a member of room {room_id}")).await;
                return;
            }
            dispatcher.join_room(conn_id, room_id).await;
            debug!("{} joined room:{}", conn_id, room_id);
        }

        ClientCommand::LeaveRoom { room_id } => {
            dispatcher.leave_room(conn_id, room_id).await;
            debug!("{} left room:{}", conn_id, room_id);
        }

        ClientCommand::JoinUser { user_id } => {
            if user_id != session.user_id {
                reject(dispatcher, session, command, "cannot join another user's channel".into()).await;
                return;
            }
            dispatcher.join_user(conn_id, user_id).await;
        }

        ClientCommand::SendMessage { message } => {
            if !may_relay(dispatcher, session, command, message.room_id).await {
                return;
            }
            if message.sender_id != session.user_id {
                reject(dispatcher, session, command, "sender does not match connection".into()).await;
                return;
            }
            let room = ChannelKey::Room(message.room_id);
            dispatcher
                .publish(room, &ServerEvent::NewMessage { message }, Some(conn_id))
                .await;
        }

        ClientCommand::Typing { room_id, is_typing } => {
            if !may_relay(dispatcher, session, command, room_id).await {
                return;
            }
            let event = ServerEvent::Typing {
                room_id,
                user: TypingUser {
                    id: session.user_id,
                    name: session.username.clone(),
                },
                is_typing,
            };
            dispatcher
                .publish(ChannelKey::Room(room_id), &event, Some(conn_id))
                .await;
        }

        ClientCommand::EditMessage { message } => {
            if !may_relay(dispatcher, session, command, message.room_id).await {
                return;
            }
            if message.sender_id != session.user_id {
                reject(dispatcher, session, command, "sender does not match connection".into()).await;
                return;
            }
            let room = ChannelKey::Room(message.room_id);
            dispatcher
                .publish(room, &ServerEvent::MessageUpdated { message }, Some(conn_id))
                .await;
        }

        ClientCommand::DeleteMessage { room_id, message_id } => {
            if !may_relay(dispatcher, session, command, room_id).await {
                return;
            }
            dispatcher
                .publish(
                    ChannelKey::Room(room_id),
                    &ServerEvent::MessageDeleted { room_id, message_id },
                    Some(conn_id),
                )
                .await;
        }

        ClientCommand::NotifyUser { target_user_id, kind, room_id } => {
            if !may_relay(dispatcher, session, command, room_id).await {
                return;
            }
            if !gate.may_join(target_user_id, room_id).await {
                reject(
                    dispatcher,
                    session,
                    command,
                    format!("{target_user_id} is not a member of room {room_id}"),
                )
                .await;
                return;
            }
            dispatcher
                .publish(
                    ChannelKey::User(target_user_id),
                    &ServerEvent::Notify { kind, room_id },
                    Some(conn_id),
                )
                .await;
        }
    }
}

async fn may_relay(dispatcher: &Dispatcher, session: &Session, command: &str, room_id: i64) -> bool {
    if dispatcher.is_in_room(session.connection_id, room_id).await {
        return true;
    }
    reject(dispatcher, session, command, format!("room {room_id} not joined")).await;
    false
}

async fn reject(dispatcher: &Dispatcher, session: &Session, command: &str, reason: String) {
    warn!(
        "{} ({}) {} rejected: {}",
        session.username, session.user_id, command, reason
    );
    dispatcher
        .send_to(
            session.connection_id,
            &ServerEvent::Rejected {
                command: command.to_string(),
                reason,
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crewdesk_types::events::NotifyKind;
    use crewdesk_types::models::{ChatMessage, MessageKind};
    use tokio::sync::mpsc;

    fn message(id: i64, room_id: i64, sender_id: Uuid, content: &str) -> ChatMessage {
        ChatMessage {
            id,
            room_id,
            sender_id,
            sender_name: "ada".into(),
            sender_avatar: None,
            content: content.into(),
            kind: MessageKind::Text,
            attachment_ref: None,
            reply_to_id: None,
            edited: false,
            edited_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    struct Peer {
        session: Session,
        rx: mpsc::Receiver<crate::dispatcher::Outbound>,
    }

    async fn peer(dispatcher: &Dispatcher, name: &str) -> Peer {
        let user_id = Uuid::new_v4();
        let (connection_id, rx) = dispatcher.connect(user_id).await;
        Peer {
            session: Session { connection_id, user_id, username: name.into() },
            rx,
        }
    }

    fn drain(peer: &mut Peer) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(raw) = peer.rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    fn members_of_five(_: Uuid, room_id: i64) -> bool {
        room_id == 5
    }

    #[tokio::test]
    async fn join_room_is_gated() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;

        handle_command(&dispatcher, &members_of_five, &ada.session, ClientCommand::JoinRoom { room_id: 7 }).await;
        assert!(!dispatcher.is_in_room(ada.session.connection_id, 7).await);
        assert!(matches!(
            drain(&mut ada).as_slice(),
            [ServerEvent::Rejected { command, .. }] if command == "join-room"
        ));

        handle_command(&dispatcher, &members_of_five, &ada.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        assert!(dispatcher.is_in_room(ada.session.connection_id, 5).await);
        assert!(drain(&mut ada).is_empty());
    }

    #[tokio::test]
    async fn typing_is_stamped_with_the_session_user() {
        let dispatcher = Dispatcher::new(16);
        let ada = peer(&dispatcher, "ada").await;
        let mut bob = peer(&dispatcher, "bob").await;
        let mut eve = peer(&dispatcher, "eve").await;

        for p in [&ada, &bob] {
            handle_command(&dispatcher, &members_of_five, &p.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        }
        handle_command(
            &dispatcher,
            &members_of_five,
            &eve.session,
            ClientCommand::JoinUser { user_id: eve.session.user_id },
        )
        .await;

        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::Typing { room_id: 5, is_typing: true },
        )
        .await;

        let expected = ServerEvent::Typing {
            room_id: 5,
            user: TypingUser { id: ada.session.user_id, name: "ada".into() },
            is_typing: true,
        };
        assert_eq!(drain(&mut bob), vec![expected]);
        assert!(drain(&mut eve).is_empty());
    }

    #[tokio::test]
    async fn relays_require_a_joined_room() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;
        let mut bob = peer(&dispatcher, "bob").await;
        handle_command(&dispatcher, &members_of_five, &bob.session, ClientCommand::JoinRoom { room_id: 5 }).await;

        let message = message(1, 5, ada.session.user_id, "hello");
        handle_command(&dispatcher, &members_of_five, &ada.session, ClientCommand::SendMessage { message }).await;

        assert!(drain(&mut bob).is_empty());
        assert!(matches!(drain(&mut ada).as_slice(), [ServerEvent::Rejected { .. }]));
    }

    #[tokio::test]
    async fn message_relays_reach_other_viewers_as_server_events() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;
        let mut bob = peer(&dispatcher, "bob").await;
        for p in [&ada, &bob] {
            handle_command(&dispatcher, &members_of_five, &p.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        }

        let original = message(11, 5, ada.session.user_id, "foo");
        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::SendMessage { message: original.clone() },
        )
        .await;

        let mut edited = original.clone();
        edited.content = "bar".into();
        edited.edited = true;
        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::EditMessage { message: edited.clone() },
        )
        .await;

        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::DeleteMessage { room_id: 5, message_id: 11 },
        )
        .await;

        assert_eq!(
            drain(&mut bob),
            vec![
                ServerEvent::NewMessage { message: original },
                ServerEvent::MessageUpdated { message: edited },
                ServerEvent::MessageDeleted { room_id: 5, message_id: 11 },
            ]
        );
        assert!(drain(&mut ada).is_empty());
    }

    #[tokio::test]
    async fn forged_sender_is_rejected() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;
        let mut bob = peer(&dispatcher, "bob").await;
        for p in [&ada, &bob] {
            handle_command(&dispatcher, &members_of_five, &p.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        }

        let forged = message(2, 5, bob.session.user_id, "not me");
        handle_command(&dispatcher, &members_of_five, &ada.session, ClientCommand::EditMessage { message: forged }).await;

        assert!(drain(&mut bob).is_empty());
        assert!(matches!(drain(&mut ada).as_slice(), [ServerEvent::Rejected { .. }]));
    }

    #[tokio::test]
    async fn notify_user_targets_the_personal_channel() {
        let dispatcher = Dispatcher::new(16);
        let ada = peer(&dispatcher, "ada").await;
        let mut carol = peer(&dispatcher, "carol").await;
        let mut carol_other_room = peer(&dispatcher, "carol-tab").await;

        handle_command(&dispatcher, &members_of_five, &ada.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        handle_command(
            &dispatcher,
            &members_of_five,
            &carol.session,
            ClientCommand::JoinUser { user_id: carol.session.user_id },
        )
        .await;
        handle_command(&dispatcher, &members_of_five, &carol_other_room.session, ClientCommand::JoinRoom { room_id: 5 }).await;

        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::NotifyUser {
                target_user_id: carol.session.user_id,
                kind: NotifyKind::NewMessage,
                room_id: 5,
            },
        )
        .await;

        assert_eq!(
            drain(&mut carol),
            vec![ServerEvent::Notify { kind: NotifyKind::NewMessage, room_id: 5 }]
        );
        assert!(drain(&mut carol_other_room).is_empty());
    }

    #[tokio::test]
    async fn notify_user_refuses_targets_outside_the_room() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;
        let mut eve = peer(&dispatcher, "eve").await;
        let eve_id = eve.session.user_id;
        let gate = move |user_id: Uuid, room_id: i64| room_id == 5 && user_id != eve_id;

        handle_command(&dispatcher, &gate, &ada.session, ClientCommand::JoinRoom { room_id: 5 }).await;
        handle_command(&dispatcher, &gate, &eve.session, ClientCommand::JoinUser { user_id: eve_id }).await;

        handle_command(
            &dispatcher,
            &gate,
            &ada.session,
            ClientCommand::NotifyUser { target_user_id: eve_id, kind: NotifyKind::NewMessage, room_id: 5 },
        )
        .await;

        assert!(drain(&mut eve).is_empty());
        assert!(matches!(
            drain(&mut ada).as_slice(),
            [ServerEvent::Rejected { command, .. }] if command == "notify-user"
        ));
    }

    #[tokio::test]
    async fn join_user_refuses_foreign_channels() {
        let dispatcher = Dispatcher::new(16);
        let mut ada = peer(&dispatcher, "ada").await;

        handle_command(
            &dispatcher,
            &members_of_five,
            &ada.session,
            ClientCommand::JoinUser { user_id: Uuid::new_v4() },
        )
        .await;

        assert!(matches!(drain(&mut ada).as_slice(), [ServerEvent::Rejected { .. }]));
        assert_eq!(dispatcher.stats().await.channels, 0);
    }
}
