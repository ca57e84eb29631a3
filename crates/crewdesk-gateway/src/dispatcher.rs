use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crewdesk_types::events::{ChannelKey, ServerEvent};
use crewdesk_types::models::RoomId;

pub type ConnectionId = Uuid;

/// Serialized event queued for one connection. Broadcast payloads are
/// serialized once and shared between all recipients.
pub type Outbound = Arc<str>;

/// Decides whether a user may subscribe to a room channel.
#[async_trait]
pub trait RoomGate: Send + Sync {
    async fn may_join(&self, user_id: Uuid, room_id: RoomId) -> bool;
}

#[async_trait]
impl<F> RoomGate for F
where
    F: Fn(Uuid, RoomId) -> bool + Send + Sync,
{
    async fn may_join(&self, user_id: Uuid, room_id: RoomId) -> bool {
        self(user_id, room_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutStats {
    pub connections: usize,
    pub channels: usize,
    pub delivered: u64,
    pub dropped: u64,
}

/// Owns every live connection and its channel memberships.
///
/// Created at server start and handed to the upgrade handler; dropping the
/// last clone tears the registry down. A single coarse lock guards both maps
/// since joins and broadcasts are frequent but individually cheap.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: RwLock<Registry>,
    outbound_capacity: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    channels: HashMap<ChannelKey, HashSet<ConnectionId>>,
}

struct ConnectionEntry {
    user_id: Uuid,
    outbound: mpsc::Sender<Outbound>,
    rooms: HashSet<RoomId>,
    user_channel: Option<Uuid>,
}

impl Registry {
    fn subscribe(&mut self, key: ChannelKey, conn_id: ConnectionId) {
        self.channels.entry(key).or_default().insert(conn_id);
    }

    fn unsubscribe(&mut self, key: ChannelKey, conn_id: ConnectionId) {
        if let Some(members) = self.channels.get_mut(&key) {
            members.remove(&conn_id);
            if members.is_empty() {
                self.channels.remove(&key);
            }
        }
    }
}

impl Dispatcher {
    /// `outbound_capacity` bounds each connection's queue; a peer that falls
    /// that far behind loses events rather than stalling the sender.
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry: RwLock::new(Registry::default()),
                outbound_capacity: outbound_capacity.max(1),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a connection with an empty channel set.
    pub async fn connect(&self, user_id: Uuid) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.outbound_capacity);
        self.inner.registry.write().await.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                outbound: tx,
                rooms: HashSet::new(),
                user_channel: None,
            },
        );
        debug!("connection {} registered for {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Remove a connection and every channel membership it held.
    pub async fn disconnect(&self, conn_id: ConnectionId) -> bool {
        let mut registry = self.inner.registry.write().await;
        let Some(entry) = registry.connections.remove(&conn_id) else {
            return false;
        };

        for room_id in entry.rooms {
            registry.unsubscribe(ChannelKey::Room(room_id), conn_id);
        }
        if let Some(user_id) = entry.user_channel {
            registry.unsubscribe(ChannelKey::User(user_id), conn_id);
        }
        debug!("connection {} of {} removed", conn_id, entry.user_id);
        true
    }

    /// Returns false if the connection is unknown.
    pub async fn join_room(&self, conn_id: ConnectionId, room_id: RoomId) -> bool {
        let mut registry = self.inner.registry.write().await;
        let Some(entry) = registry.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.rooms.insert(room_id);
        registry.subscribe(ChannelKey::Room(room_id), conn_id);
        true
    }

    /// Returns true if the connection was in the room.
    pub async fn leave_room(&self, conn_id: ConnectionId, room_id: RoomId) -> bool {
        let mut registry = self.inner.registry.write().await;
        let was_joined = registry
            .connections
            .get_mut(&conn_id)
            .is_some_and(|entry| entry.rooms.remove(&room_id));
        if was_joined {
            registry.unsubscribe(ChannelKey::Room(room_id), conn_id);
        }
        was_joined
    }

    /// Pull every connection of `user_id` out of `room:<room_id>`, e.g. after
    /// the user lost their membership. Returns how many were evicted.
    pub async fn evict_user_from_room(&self, user_id: Uuid, room_id: RoomId) -> usize {
        let mut registry = self.inner.registry.write().await;
        let evicted: Vec<ConnectionId> = registry
            .connections
            .iter_mut()
            .filter(|(_, entry)| entry.user_id == user_id)
            .filter_map(|(conn_id, entry)| entry.rooms.remove(&room_id).then_some(*conn_id))
            .collect();

        for conn_id in &evicted {
            registry.unsubscribe(ChannelKey::Room(room_id), *conn_id);
        }
        if !evicted.is_empty() {
            debug!("evicted {} connection(s) of {} from room:{}", evicted.len(), user_id, room_id);
        }
        evicted.len()
    }

    /// Empty `room:<room_id>` entirely. Returns how many connections it held.
    pub async fn close_room(&self, room_id: RoomId) -> usize {
        let mut registry = self.inner.registry.write().await;
        let Some(members) = registry.channels.remove(&ChannelKey::Room(room_id)) else {
            return 0;
        };
        for conn_id in &members {
            if let Some(entry) = registry.connections.get_mut(conn_id) {
                entry.rooms.remove(&room_id);
            }
        }
        debug!("closed room:{} ({} connection(s))", room_id, members.len());
        members.len()
    }

    /// Bind the connection to `user:<user_id>`, replacing any earlier user
    /// channel. Returns false if the connection is unknown.
    pub async fn join_user(&self, conn_id: ConnectionId, user_id: Uuid) -> bool {
        let mut registry = self.inner.registry.write().await;
        let previous = match registry.connections.get_mut(&conn_id) {
            Some(entry) => entry.user_channel.replace(user_id),
            None => return false,
        };
        if let Some(old) = previous.filter(|old| *old != user_id) {
            registry.unsubscribe(ChannelKey::User(old), conn_id);
        }
        registry.subscribe(ChannelKey::User(user_id), conn_id);
        true
    }

    pub async fn is_in_room(&self, conn_id: ConnectionId, room_id: RoomId) -> bool {
        self.inner
            .registry
            .read()
            .await
            .connections
            .get(&conn_id)
            .is_some_and(|entry| entry.rooms.contains(&room_id))
    }

    /// Fire-and-forget delivery to every connection on `channel` except
    /// `except`. Returns how many connections accepted the event.
    pub async fn publish(
        &self,
        channel: ChannelKey,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };

        let registry = self.inner.registry.read().await;
        let Some(members) = registry.channels.get(&channel) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members.iter().filter(|id| Some(**id) != except) {
            let Some(entry) = registry.connections.get(conn_id) else {
                continue;
            };
            if self.offer(*conn_id, entry, payload.clone()) {
                delivered += 1;
            }
        }

        debug!("{} -> {} connection(s)", channel, delivered);
        delivered
    }

    /// Deliver an event to one connection only.
    pub async fn send_to(&self, conn_id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(payload) = encode(event) else {
            return false;
        };
        let registry = self.inner.registry.read().await;
        match registry.connections.get(&conn_id) {
            Some(entry) => self.offer(conn_id, entry, payload),
            None => false,
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.registry.read().await.connections.len()
    }

    pub async fn channel_size(&self, channel: ChannelKey) -> usize {
        self.inner
            .registry
            .read()
            .await
            .channels
            .get(&channel)
            .map_or(0, HashSet::len)
    }

    pub async fn stats(&self) -> FanoutStats {
        let registry = self.inner.registry.read().await;
        FanoutStats {
            connections: registry.connections.len(),
            channels: registry.channels.len(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    fn offer(&self, conn_id: ConnectionId, entry: &ConnectionEntry, payload: Outbound) -> bool {
        match entry.outbound.try_send(payload) {
            Ok(()) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Outbound queue full for connection {} ({}), dropping event",
                    conn_id, entry.user_id
                );
                false
            }
            // Writer already gone; disconnect cleanup is on its way.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Outbound> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            error!("Failed to serialize realtime event: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crewdesk_types::events::TypingUser;

    fn typing(room_id: RoomId) -> ServerEvent {
        ServerEvent::Typing {
            room_id,
            user: TypingUser { id: Uuid::nil(), name: "ada".into() },
            is_typing: true,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            out.push(serde_json::from_str(&raw).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn room_broadcast_reaches_only_other_room_members() {
        let dispatcher = Dispatcher::new(16);
        let (a, mut a_rx) = dispatcher.connect(Uuid::new_v4()).await;
        let (b, mut b_rx) = dispatcher.connect(Uuid::new_v4()).await;
        let (c, mut c_rx) = dispatcher.connect(Uuid::new_v4()).await;
        let d_user = Uuid::new_v4();
        let (d, mut d_rx) = dispatcher.connect(d_user).await;

        dispatcher.join_room(a, 5).await;
        dispatcher.join_room(b, 5).await;
        dispatcher.join_room(c, 7).await;
        dispatcher.join_user(d, d_user).await;

        let delivered = dispatcher.publish(ChannelKey::Room(5), &typing(5), Some(a)).await;
        assert_eq!(delivered, 1);

        assert!(drain(&mut a_rx).is_empty());
        assert_eq!(drain(&mut b_rx), vec![typing(5)]);
        assert!(drain(&mut c_rx).is_empty());
        assert!(drain(&mut d_rx).is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_every_channel() {
        let dispatcher = Dispatcher::new(16);
        let user = Uuid::new_v4();
        let (conn, _rx) = dispatcher.connect(user).await;
        dispatcher.join_room(conn, 1).await;
        dispatcher.join_room(conn, 2).await;
        dispatcher.join_user(conn, user).await;
        assert_eq!(dispatcher.stats().await.channels, 3);

        assert!(dispatcher.disconnect(conn).await);
        assert!(!dispatcher.disconnect(conn).await);

        let stats = dispatcher.stats().await;
        assert_eq!(stats.connections, 0);
        assert_eq!(stats.channels, 0);
        assert_eq!(dispatcher.publish(ChannelKey::Room(1), &typing(1), None).await, 0);
    }

    #[tokio::test]
    async fn a_connection_holds_at_most_one_user_channel() {
        let dispatcher = Dispatcher::new(16);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let (conn, _rx) = dispatcher.connect(first).await;

        dispatcher.join_user(conn, first).await;
        dispatcher.join_user(conn, second).await;

        assert_eq!(dispatcher.channel_size(ChannelKey::User(first)).await, 0);
        assert_eq!(dispatcher.channel_size(ChannelKey::User(second)).await, 1);
    }

    #[tokio::test]
    async fn leave_room_stops_delivery() {
        let dispatcher = Dispatcher::new(16);
        let (conn, mut rx) = dispatcher.connect(Uuid::new_v4()).await;
        dispatcher.join_room(conn, 9).await;
        assert!(dispatcher.is_in_room(conn, 9).await);

        assert!(dispatcher.leave_room(conn, 9).await);
        assert!(!dispatcher.leave_room(conn, 9).await);
        assert!(!dispatcher.is_in_room(conn, 9).await);

        dispatcher.publish(ChannelKey::Room(9), &typing(9), None).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn evicting_a_user_covers_all_their_tabs_and_nothing_else() {
        let dispatcher = Dispatcher::new(16);
        let cyd = Uuid::new_v4();
        let (tab1, mut tab1_rx) = dispatcher.connect(cyd).await;
        let (tab2, mut tab2_rx) = dispatcher.connect(cyd).await;
        let (ada, mut ada_rx) = dispatcher.connect(Uuid::new_v4()).await;
        for conn in [tab1, tab2, ada] {
            dispatcher.join_room(conn, 4).await;
        }
        dispatcher.join_room(tab1, 8).await;

        assert_eq!(dispatcher.evict_user_from_room(cyd, 4).await, 2);
        assert_eq!(dispatcher.evict_user_from_room(cyd, 4).await, 0);
        assert!(!dispatcher.is_in_room(tab1, 4).await);
        assert!(dispatcher.is_in_room(tab1, 8).await);

        dispatcher.publish(ChannelKey::Room(4), &typing(4), None).await;
        assert!(drain(&mut tab1_rx).is_empty());
        assert!(drain(&mut tab2_rx).is_empty());
        assert_eq!(drain(&mut ada_rx), vec![typing(4)]);
    }

    #[tokio::test]
    async fn closing_a_room_unsubscribes_everyone() {
        let dispatcher = Dispatcher::new(16);
        let (a, mut a_rx) = dispatcher.connect(Uuid::new_v4()).await;
        let (b, _b_rx) = dispatcher.connect(Uuid::new_v4()).await;
        dispatcher.join_room(a, 6).await;
        dispatcher.join_room(b, 6).await;
        dispatcher.join_room(b, 2).await;

        assert_eq!(dispatcher.close_room(6).await, 2);
        assert_eq!(dispatcher.close_room(6).await, 0);
        assert!(!dispatcher.is_in_room(a, 6).await);
        assert!(dispatcher.is_in_room(b, 2).await);
        assert_eq!(dispatcher.publish(ChannelKey::Room(6), &typing(6), None).await, 0);
        assert!(drain(&mut a_rx).is_empty());

        // a later disconnect must not trip over the emptied channel
        assert!(dispatcher.disconnect(a).await);
        assert_eq!(dispatcher.stats().await.channels, 1);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let dispatcher = Dispatcher::new(1);
        let (conn, mut rx) = dispatcher.connect(Uuid::new_v4()).await;
        dispatcher.join_room(conn, 3).await;

        assert_eq!(dispatcher.publish(ChannelKey::Room(3), &typing(3), None).await, 1);
        assert_eq!(dispatcher.publish(ChannelKey::Room(3), &typing(3), None).await, 0);

        let stats = dispatcher.stats().await;
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn unknown_connections_are_ignored() {
        let dispatcher = Dispatcher::new(4);
        let ghost = Uuid::new_v4();
        assert!(!dispatcher.join_room(ghost, 1).await);
        assert!(!dispatcher.join_user(ghost, ghost).await);
        assert!(!dispatcher.send_to(ghost, &typing(1)).await);
        assert_eq!(dispatcher.channel_size(ChannelKey::Room(1)).await, 0);
    }
}
