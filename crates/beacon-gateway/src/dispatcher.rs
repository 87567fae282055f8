use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error};
use uuid::Uuid;

use beacon_types::events::{Room, SocketEvent};

/// Serialized event text, shared by every connection it is delivered to.
pub type Outbound = Arc<str>;

struct ConnectionEntry {
    user_id: Uuid,
    rooms: HashSet<Room>,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// Tracks connected clients and the rooms they joined, and routes events
/// to them.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    /// conn_id -> connection. One user may hold several connections.
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

fn encode(event: &SocketEvent) -> Option<Outbound> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.name(), e);
            None
        }
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in `rooms`. Returns (conn_id, receiver).
    pub async fn register(
        &self,
        user_id: Uuid,
        rooms: impl IntoIterator<Item = Room>,
    ) -> (Uuid, mpsc::UnboundedReceiver<Outbound>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.insert(
            conn_id,
            ConnectionEntry {
                user_id,
                rooms: rooms.into_iter().collect(),
                tx,
            },
        );
        (conn_id, rx)
    }

    pub async fn unregister(&self, conn_id: Uuid) {
        if let Some(entry) = self.inner.connections.write().await.remove(&conn_id) {
            debug!("Connection {} for user {} unregistered", conn_id, entry.user_id);
        }
    }

    /// Deliver an event to every connection in `room`. Returns the number
    /// of connections it was queued for.
    pub async fn emit(&self, room: Room, event: &SocketEvent) -> usize {
        self.emit_many(&[room], event).await
    }

    /// Deliver an event to every connection in any of `rooms`, once per
    /// connection even when it sits in several of them.
    pub async fn emit_many(&self, rooms: &[Room], event: &SocketEvent) -> usize {
        let Some(text) = encode(event) else {
            return 0;
        };

        let connections = self.inner.connections.read().await;
        let mut delivered = 0;
        for entry in connections.values() {
            if rooms.iter().any(|room| entry.rooms.contains(room)) && entry.tx.send(text.clone()).is_ok() {
                delivered += 1;
            }
        }

        debug!("{} -> {} connection(s)", event.name(), delivered);
        delivered
    }

    /// Send an event to one specific connection.
    pub async fn send_to_connection(&self, conn_id: Uuid, event: &SocketEvent) {
        let Some(text) = encode(event) else {
            return;
        };
        if let Some(entry) = self.inner.connections.read().await.get(&conn_id) {
            let _ = entry.tx.send(text);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_types::events::RowRemove;
    use beacon_types::models::Role;

    fn remove_event(id: &str) -> SocketEvent {
        SocketEvent::CommentRemove(RowRemove {
            id: id.to_string(),
            previous_status: None,
        })
    }

    #[tokio::test]
    async fn emits_only_to_matching_rooms() {
        let dispatcher = Dispatcher::new();
        let admin = Uuid::new_v4();
        let support = Uuid::new_v4();
        let (_, mut admin_rx) = dispatcher
            .register(admin, [Room::User(admin), Room::Role(Role::Admin)])
            .await;
        let (_, mut support_rx) = dispatcher
            .register(support, [Room::User(support), Room::Role(Role::Support)])
            .await;

        let delivered = dispatcher
            .emit(Room::Role(Role::Admin), &remove_event("c1"))
            .await;
        assert_eq!(delivered, 1);

        let text = admin_rx.recv().await.unwrap();
        let event: SocketEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(event, remove_event("c1"));
        assert!(support_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn overlapping_rooms_deliver_once() {
        let dispatcher = Dispatcher::new();
        let admin = Uuid::new_v4();
        let (_, mut rx) = dispatcher
            .register(admin, [Room::User(admin), Room::Role(Role::Admin)])
            .await;

        let delivered = dispatcher
            .emit_many(
                &[Room::User(admin), Room::Role(Role::Admin)],
                &remove_event("c1"),
            )
            .await;
        assert_eq!(delivered, 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = dispatcher.register(user, [Room::User(user)]).await;
        let (_second, _rx2) = dispatcher.register(user, [Room::User(user)]).await;
        assert_eq!(dispatcher.connection_count().await, 2);

        dispatcher.unregister(first).await;
        assert_eq!(dispatcher.connection_count().await, 1);
        assert_eq!(dispatcher.emit(Room::User(user), &remove_event("x")).await, 1);
    }
}
