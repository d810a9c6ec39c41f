//! Presence registry: who currently holds a live connection.
//!
//! Pure in-memory state. All operations are total; broadcasting presence
//! changes is the caller's responsibility.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::events::{ConnectionId, UserId};

/// Bidirectional user ↔ connection mapping. Process-wide singleton, rebuilt
/// empty on restart.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<PresenceInner>>,
}

#[derive(Default)]
struct PresenceInner {
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a presence entry. Idempotent: re-registering the same pair leaves
    /// the registry unchanged.
    pub async fn register(&self, user_id: &str, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        inner
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(connection_id);
        inner.by_connection.insert(connection_id, user_id.to_string());
    }

    /// Remove exactly the entry matching this connection; other connections
    /// of the same user are untouched. No-op if the connection is unknown.
    pub async fn unregister(&self, connection_id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        let Some(user_id) = inner.by_connection.remove(&connection_id) else {
            return;
        };
        if let Some(connections) = inner.by_user.get_mut(&user_id) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                inner.by_user.remove(&user_id);
            }
        }
    }

    /// All live connections for a user; empty if offline.
    pub async fn resolve(&self, user_id: &str) -> HashSet<ConnectionId> {
        let inner = self.inner.lock().await;
        inner.by_user.get(user_id).cloned().unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner.by_user.contains_key(user_id)
    }

    /// Number of distinct users currently present (not connections).
    pub async fn online_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.by_user.len()
    }

    /// Snapshot of the online user ids, for the presence-change broadcast.
    pub async fn online_user_ids(&self) -> Vec<UserId> {
        let inner = self.inner.lock().await;
        inner.by_user.keys().cloned().collect()
    }
}
