use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

use yapyap_types::events::GatewayEvent;

/// Tracks live connections and the chat rooms each one has joined, and
/// pushes events to them. Delivery is best-effort: an event sent while a
/// connection is not in the room is simply not delivered to it.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// conn_id -> connection
    connections: HashMap<Uuid, ConnectionEntry>,

    /// chat_id -> conn_ids currently in the room
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<Uuid>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user. Returns (conn_id, receiver).
    /// A user may hold several connections at once.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Drop a connection and take it out of every room it was in.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut registry = self.inner.write().await;
        let Some(entry) = registry.connections.remove(&conn_id) else {
            return;
        };

        for chat_id in entry.rooms {
            remove_from_room(&mut registry.rooms, chat_id, conn_id);
        }
    }

    /// Put a connection in a chat room. Returns false for an unknown
    /// connection. Joining twice is harmless.
    pub async fn join_room(&self, conn_id: Uuid, chat_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        let registry = &mut *guard;
        let Some(entry) = registry.connections.get_mut(&conn_id) else {
            return false;
        };

        entry.rooms.insert(chat_id);
        registry.rooms.entry(chat_id).or_default().insert(conn_id);
        true
    }

    /// Take a connection out of a chat room. Returns false if it was not in it.
    pub async fn leave_room(&self, conn_id: Uuid, chat_id: Uuid) -> bool {
        let mut registry = self.inner.write().await;
        let was_in_room = registry
            .connections
            .get_mut(&conn_id)
            .is_some_and(|entry| entry.rooms.remove(&chat_id));

        if was_in_room {
            remove_from_room(&mut registry.rooms, chat_id, conn_id);
        }
        was_in_room
    }

    /// Take every connection of a user out of a chat room, e.g. after they
    /// were removed from the chat. Returns how many connections left.
    pub async fn evict_user(&self, chat_id: Uuid, user_id: Uuid) -> usize {
        let mut guard = self.inner.write().await;
        let registry = &mut *guard;
        let Some(members) = registry.rooms.get(&chat_id) else {
            return 0;
        };

        let evicted: Vec<Uuid> = members
            .iter()
            .copied()
            .filter(|conn_id| {
                registry
                    .connections
                    .get(conn_id)
                    .is_some_and(|entry| entry.user_id == user_id)
            })
            .collect();

        for conn_id in &evicted {
            if let Some(entry) = registry.connections.get_mut(conn_id) {
                entry.rooms.remove(&chat_id);
            }
            remove_from_room(&mut registry.rooms, chat_id, *conn_id);
        }

        if !evicted.is_empty() {
            debug!("Evicted user {} from room {} ({} connections)", user_id, chat_id, evicted.len());
        }
        evicted.len()
    }

    /// Empty a chat room entirely. Used once the chat itself is gone.
    pub async fn close_room(&self, chat_id: Uuid) {
        let mut guard = self.inner.write().await;
        let registry = &mut *guard;
        let Some(members) = registry.rooms.remove(&chat_id) else {
            return;
        };

        for conn_id in members {
            if let Some(entry) = registry.connections.get_mut(&conn_id) {
                entry.rooms.remove(&chat_id);
            }
        }
    }

    /// Push an event to every connection in a chat room, skipping all
    /// connections owned by `except_user`. Returns how many connections the
    /// event was handed to.
    pub async fn publish(&self, chat_id: Uuid, event: GatewayEvent, except_user: Option<Uuid>) -> usize {
        let registry = self.inner.read().await;
        let Some(members) = registry.rooms.get(&chat_id) else {
            return 0;
        };

        let mut delivered = 0;
        for conn_id in members {
            let Some(entry) = registry.connections.get(conn_id) else {
                continue;
            };
            if Some(entry.user_id) == except_user {
                continue;
            }
            if entry.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!("Published to room {} ({} connections)", chat_id, delivered);
        delivered
    }

    /// Send an event to one connection only.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: GatewayEvent) {
        let registry = self.inner.read().await;
        if let Some(entry) = registry.connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Number of connections currently in a chat room.
    pub async fn room_size(&self, chat_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .rooms
            .get(&chat_id)
            .map_or(0, HashSet::len)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}

fn remove_from_room(rooms: &mut HashMap<Uuid, HashSet<Uuid>>, chat_id: Uuid, conn_id: Uuid) {
    if let Some(members) = rooms.get_mut(&chat_id) {
        members.remove(&conn_id);
        if members.is_empty() {
            rooms.remove(&chat_id);
        }
    }
}
