//! Relay router: resolves a user or room to live connections and pushes
//! events to them.
//!
//! Delivery is fire-and-forget: no retries, no acknowledgements, no outbox.
//! Unknown rooms and offline users are silently dropped.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::events::{ConnectionId, RoomId, ServerEvent, UserId};
use crate::presence::PresenceRegistry;

/// Routes events to live connections, directly, per user, per room, or to
/// everyone. Room membership lives here and is never persisted.
#[derive(Clone)]
pub struct RelayRouter {
    registry: PresenceRegistry,
    inner: Arc<Mutex<RouterInner>>,
}

#[derive(Default)]
struct RouterInner {
    connections: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
}

impl RelayRouter {
    pub fn new(registry: PresenceRegistry) -> Self {
        Self {
            registry,
            inner: Arc::new(Mutex::new(RouterInner::default())),
        }
    }

    /// Register the outbound channel of a freshly upgraded connection.
    pub async fn attach(&self, connection_id: ConnectionId, sender: mpsc::Sender<ServerEvent>) {
        let mut inner = self.inner.lock().await;
        inner.connections.insert(connection_id, sender);
    }

    /// Drop a connection and remove it from every room. Returns the rooms it
    /// was a member of so the caller can notify the remaining members.
    pub async fn detach(&self, connection_id: ConnectionId) -> Vec<RoomId> {
        let mut inner = self.inner.lock().await;
        inner.connections.remove(&connection_id);

        let rooms = inner
            .memberships
            .remove(&connection_id)
            .unwrap_or_default();
        for room_id in &rooms {
            if let Some(members) = inner.rooms.get_mut(room_id) {
                members.remove(&connection_id);
                if members.is_empty() {
                    inner.rooms.remove(room_id);
                }
            }
        }
        rooms.into_iter().collect()
    }

    pub async fn join_room(&self, room_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id);
        inner
            .memberships
            .entry(connection_id)
            .or_default()
            .insert(room_id.to_string());
    }

    pub async fn leave_room(&self, room_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
        if let Some(rooms) = inner.memberships.get_mut(&connection_id) {
            rooms.remove(room_id);
        }
    }

    /// Push to one connection. Returns false if it is gone.
    pub async fn send_to_connection(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let inner = self.inner.lock().await;
        deliver(&inner.connections, connection_id, event)
    }

    /// Push to every live connection of a user; dropped silently if offline.
    pub async fn send_to_user(&self, user_id: &str, event: ServerEvent) {
        let connections = self.registry.resolve(user_id).await;
        let inner = self.inner.lock().await;
        for connection_id in connections {
            deliver(&inner.connections, connection_id, event.clone());
        }
    }

    /// Push to every member of a room.
    pub async fn send_to_room(&self, room_id: &str, event: ServerEvent) {
        self.send_to_room_inner(room_id, None, event).await;
    }

    /// Push to every member of a room except one connection (the sender).
    pub async fn send_to_room_except(
        &self,
        room_id: &str,
        except: ConnectionId,
        event: ServerEvent,
    ) {
        self.send_to_room_inner(room_id, Some(except), event).await;
    }

    async fn send_to_room_inner(
        &self,
        room_id: &str,
        except: Option<ConnectionId>,
        event: ServerEvent,
    ) {
        let inner = self.inner.lock().await;
        let Some(members) = inner.rooms.get(room_id) else {
            debug!(room_id, "relay to unknown room dropped");
            return;
        };
        for connection_id in members {
            if Some(*connection_id) == except {
                continue;
            }
            deliver(&inner.connections, *connection_id, event.clone());
        }
    }

    /// Push to every live connection; used for the stats broadcast and the
    /// online-user list.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let inner = self.inner.lock().await;
        for (connection_id, sender) in &inner.connections {
            if sender.try_send(event.clone()).is_err() {
                debug!(%connection_id, "broadcast dropped for saturated or closed connection");
            }
        }
    }
}

fn deliver(
    connections: &HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    connection_id: ConnectionId,
    event: ServerEvent,
) -> bool {
    let Some(sender) = connections.get(&connection_id) else {
        debug!(%connection_id, "relay to unknown connection dropped");
        return false;
    };
    if sender.try_send(event).is_err() {
        debug!(%connection_id, "relay dropped for saturated or closed connection");
        return false;
    }
    true
}
