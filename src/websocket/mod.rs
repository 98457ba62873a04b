use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod dispatch;
pub mod events;
pub mod handlers;

use events::WsOutboundEvent;

/// Unique identifier for a connected socket. Allocated on registration,
/// used for precise cleanup and for excluding the sender from broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(Uuid);

impl SocketId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Broadcast targets. Personal rooms receive out-of-band notifications;
/// conversation rooms receive the live chat traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Conversation(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user-{id}"),
            Room::Conversation(id) => write!(f, "conversation-{id}"),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    sockets: HashMap<SocketId, UnboundedSender<WsOutboundEvent>>,
    rooms: HashMap<Room, HashSet<SocketId>>,
    // socket -> joined rooms, so teardown and reconnect restoration are a
    // pure function of recorded state
    joined: HashMap<SocketId, HashSet<Room>>,
}

/// Explicit room membership state for all connected sockets. Only the
/// gateway joins or leaves sockets; nothing else touches rooms.
#[derive(Default, Clone)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> (SocketId, UnboundedReceiver<WsOutboundEvent>) {
        let (tx, rx) = unbounded_channel();
        let id = SocketId::new();
        let mut guard = self.inner.write().await;
        guard.sockets.insert(id, tx);
        guard.joined.insert(id, HashSet::new());
        (id, rx)
    }

    pub async fn unregister(&self, socket: SocketId) {
        let mut guard = self.inner.write().await;
        guard.sockets.remove(&socket);
        if let Some(rooms) = guard.joined.remove(&socket) {
            for room in rooms {
                if let Some(members) = guard.rooms.get_mut(&room) {
                    members.remove(&socket);
                    if members.is_empty() {
                        guard.rooms.remove(&room);
                    }
                }
            }
        }
    }

    pub async fn join(&self, socket: SocketId, room: Room) {
        let mut guard = self.inner.write().await;
        if !guard.sockets.contains_key(&socket) {
            return;
        }
        guard.rooms.entry(room).or_default().insert(socket);
        guard.joined.entry(socket).or_default().insert(room);
    }

    pub async fn leave(&self, socket: SocketId, room: Room) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.rooms.get_mut(&room) {
            members.remove(&socket);
            if members.is_empty() {
                guard.rooms.remove(&room);
            }
        }
        if let Some(rooms) = guard.joined.get_mut(&socket) {
            rooms.remove(&room);
        }
    }

    pub async fn rooms_of(&self, socket: SocketId) -> HashSet<Room> {
        let guard = self.inner.read().await;
        guard.joined.get(&socket).cloned().unwrap_or_default()
    }

    /// Deliver to one socket. Delivery failure means the receiver side is
    /// gone; the socket loop will unregister it.
    pub async fn send(&self, socket: SocketId, event: WsOutboundEvent) {
        let guard = self.inner.read().await;
        if let Some(tx) = guard.sockets.get(&socket) {
            let _ = tx.send(event);
        }
    }

    pub async fn broadcast(&self, room: Room, event: WsOutboundEvent, exclude: Option<SocketId>) {
        let guard = self.inner.read().await;
        if let Some(members) = guard.rooms.get(&room) {
            for member in members {
                if Some(*member) == exclude {
                    continue;
                }
                if let Some(tx) = guard.sockets.get(member) {
                    let _ = tx.send(event.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(text: &str) -> WsOutboundEvent {
        WsOutboundEvent::Error {
            message: text.to_string(),
        }
    }

    fn text_of(event: &WsOutboundEvent) -> &str {
        match event {
            WsOutboundEvent::Error { message } => message,
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;
        let (_c, mut rx_c) = registry.register().await;

        let room = Room::Conversation(Uuid::new_v4());
        registry.join(a, room).await;
        registry.join(b, room).await;

        registry.broadcast(room, probe("hello"), None).await;
        assert_eq!(text_of(&rx_a.recv().await.unwrap()), "hello");
        assert_eq!(text_of(&rx_b.recv().await.unwrap()), "hello");
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_can_exclude_the_sender() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register().await;
        let (b, mut rx_b) = registry.register().await;

        let room = Room::Conversation(Uuid::new_v4());
        registry.join(a, room).await;
        registry.join(b, room).await;

        registry.broadcast(room, probe("typing"), Some(a)).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(text_of(&rx_b.recv().await.unwrap()), "typing");
    }

    #[tokio::test]
    async fn unregister_cleans_all_memberships() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register().await;
        let room1 = Room::Conversation(Uuid::new_v4());
        let room2 = Room::User(Uuid::new_v4());
        registry.join(a, room1).await;
        registry.join(a, room2).await;

        registry.unregister(a).await;
        assert!(registry.rooms_of(a).await.is_empty());

        registry.broadcast(room1, probe("gone"), None).await;
        assert!(rx_a.recv().await.is_none());
    }

    #[tokio::test]
    async fn leave_is_scoped_to_one_room() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.register().await;
        let room1 = Room::Conversation(Uuid::new_v4());
        let room2 = Room::Conversation(Uuid::new_v4());
        registry.join(a, room1).await;
        registry.join(a, room2).await;

        registry.leave(a, room1).await;
        registry.broadcast(room1, probe("one"), None).await;
        registry.broadcast(room2, probe("two"), None).await;

        assert_eq!(text_of(&rx_a.recv().await.unwrap()), "two");
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn room_names_are_stable() {
        let id = Uuid::nil();
        assert_eq!(
            Room::User(id).to_string(),
            "user-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            Room::Conversation(id).to_string(),
            "conversation-00000000-0000-0000-0000-000000000000"
        );
    }
}
