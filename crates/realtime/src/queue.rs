//! Anonymous pairing queue.
//!
//! Strict FIFO: the two oldest entries pair first. All queue mutations run
//! under one mutex, so a pop always removes both entries of a pair before any
//! concurrent `join` or `leave` can observe the queue, and only one pairing
//! run executes per pair. The conversation-creation call happens after the
//! lock is released; at that point the pair is already out of the queue.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::events::{ConnectionId, QueueJoinStatus, ServerEvent, UserId};
use crate::router::RelayRouter;
use vlant_storage::ConversationRepository;

#[derive(Debug, Clone)]
struct QueueEntry {
    user_id: UserId,
    connection_id: ConnectionId,
    enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    fn waited_ms(&self) -> i64 {
        (Utc::now() - self.enqueued_at).num_milliseconds()
    }
}

/// FIFO waiting list of users requesting anonymous matching. Process-wide
/// singleton; rebuilt empty on restart.
#[derive(Clone)]
pub struct PairingQueue {
    entries: Arc<Mutex<VecDeque<QueueEntry>>>,
    conversations: ConversationRepository,
    router: RelayRouter,
}

impl PairingQueue {
    pub fn new(conversations: ConversationRepository, router: RelayRouter) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::new())),
            conversations,
            router,
        }
    }

    /// Enter the queue. A duplicate join is idempotent: the existing entry is
    /// re-pointed at the new connection and keeps its queue position. If the
    /// insertion makes two entries available the pairing algorithm runs
    /// before this call returns.
    pub async fn join(&self, user_id: &str, connection_id: ConnectionId) -> QueueJoinStatus {
        let (status, popped) = {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.iter_mut().find(|entry| entry.user_id == user_id) {
                entry.connection_id = connection_id;
                (QueueJoinStatus::StillWaiting, None)
            } else {
                entries.push_back(QueueEntry {
                    user_id: user_id.to_string(),
                    connection_id,
                    enqueued_at: Utc::now(),
                });
                let popped = if entries.len() >= 2 {
                    let first = entries.pop_front();
                    let second = entries.pop_front();
                    first.zip(second)
                } else {
                    None
                };
                (QueueJoinStatus::Enqueued, popped)
            }
        };

        if let Some((first, second)) = popped {
            self.pair(first, second).await;
        }
        status
    }

    /// Remove a waiting entry. Idempotent: if pairing already captured the
    /// entry (or it was never queued) this is a no-op.
    pub async fn leave(&self, user_id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.user_id != user_id);
        entries.len() != before
    }

    /// Remove a waiting entry only if it is still pointed at the given
    /// connection. Used on disconnect: after a re-join moved the entry to a
    /// newer connection, the old connection going away must not take the
    /// user's place in line with it.
    pub async fn leave_if_owner(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries
            .retain(|entry| entry.user_id != user_id || entry.connection_id != connection_id);
        entries.len() != before
    }

    /// Number of waiting entries, for the stats broadcast.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    async fn pair(&self, first: QueueEntry, second: QueueEntry) {
        let participants = [first.user_id.clone(), second.user_id.clone()];
        match self.conversations.create(&participants, true).await {
            Ok(conversation) => {
                info!(
                    conversation_id = %conversation.id,
                    first = %first.user_id,
                    second = %second.user_id,
                    first_waited_ms = first.waited_ms(),
                    second_waited_ms = second.waited_ms(),
                    "paired anonymous match"
                );
                let event = ServerEvent::MatchFound {
                    conversation_id: conversation.id,
                };
                self.router
                    .send_to_connection(first.connection_id, event.clone())
                    .await;
                self.router
                    .send_to_connection(second.connection_id, event)
                    .await;
            }
            Err(error) => {
                warn!(
                    %error,
                    first = %first.user_id,
                    second = %second.user_id,
                    "conversation creation failed, returning pair to queue front"
                );
                {
                    let mut entries = self.entries.lock().await;
                    entries.push_front(second.clone());
                    entries.push_front(first.clone());
                }
                let event = ServerEvent::MatchFailed {
                    message: "matching failed, you will be retried first".to_string(),
                };
                self.router
                    .send_to_connection(first.connection_id, event.clone())
                    .await;
                self.router
                    .send_to_connection(second.connection_id, event)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceRegistry;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use tokio::sync::mpsc;
    use uuid::Uuid;
    use vlant_storage::run_migrations;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn setup() -> (PairingQueue, RelayRouter, SqlitePool) {
        let pool = test_pool().await;
        let router = RelayRouter::new(PresenceRegistry::new());
        let queue = PairingQueue::new(ConversationRepository::new(pool.clone()), router.clone());
        (queue, router, pool)
    }

    async fn attach_new(router: &RelayRouter) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(16);
        router.attach(connection_id, tx).await;
        (connection_id, rx)
    }

    async fn conversation_count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM conversations")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn two_joins_create_one_conversation() {
        let (queue, router, pool) = setup().await;
        let (conn_a, mut rx_a) = attach_new(&router).await;
        let (conn_b, mut rx_b) = attach_new(&router).await;

        assert_eq!(queue.join("alice", conn_a).await, QueueJoinStatus::Enqueued);
        assert_eq!(queue.join("bob", conn_b).await, QueueJoinStatus::Enqueued);

        let ServerEvent::MatchFound { conversation_id: id_a } = rx_a.try_recv().unwrap() else {
            panic!("expected matchFound for alice");
        };
        let ServerEvent::MatchFound { conversation_id: id_b } = rx_b.try_recv().unwrap() else {
            panic!("expected matchFound for bob");
        };
        assert_eq!(id_a, id_b);

        assert!(queue.is_empty().await);
        assert_eq!(conversation_count(&pool).await, 1);

        let repo = ConversationRepository::new(pool);
        let conversation = repo.find_by_id(&id_a).await.unwrap().unwrap();
        assert!(conversation.is_anonymous_match);
        assert_eq!(
            conversation.participant_ids,
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[tokio::test]
    async fn rejoin_updates_connection_without_duplicating() {
        let (queue, router, _pool) = setup().await;
        let (old_conn, _old_rx) = attach_new(&router).await;
        let (new_conn, mut new_rx) = attach_new(&router).await;
        let (peer_conn, _peer_rx) = attach_new(&router).await;

        assert_eq!(queue.join("alice", old_conn).await, QueueJoinStatus::Enqueued);
        assert_eq!(
            queue.join("alice", new_conn).await,
            QueueJoinStatus::StillWaiting
        );
        assert_eq!(queue.len().await, 1);

        // Pairing reaches the reconnected socket, not the stale one.
        queue.join("bob", peer_conn).await;
        assert!(matches!(
            new_rx.try_recv().unwrap(),
            ServerEvent::MatchFound { .. }
        ));
    }

    #[tokio::test]
    async fn leave_before_pairing_excludes_the_user() {
        let (queue, router, pool) = setup().await;
        let (conn_a, mut rx_a) = attach_new(&router).await;
        let (conn_b, _rx_b) = attach_new(&router).await;
        let (conn_c, _rx_c) = attach_new(&router).await;

        queue.join("alice", conn_a).await;
        assert!(queue.leave("alice").await);
        assert!(!queue.leave("alice").await);

        queue.join("bob", conn_b).await;
        queue.join("carol", conn_c).await;

        assert!(rx_a.try_recv().is_err());
        assert_eq!(conversation_count(&pool).await, 1);

        let repo = ConversationRepository::new(pool);
        assert!(repo
            .find_by_participants("bob", "carol")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn leave_if_owner_ignores_a_superseded_connection() {
        let (queue, router, _pool) = setup().await;
        let (old_conn, _old_rx) = attach_new(&router).await;
        let (new_conn, _new_rx) = attach_new(&router).await;

        queue.join("alice", old_conn).await;
        queue.join("alice", new_conn).await;

        // The entry now belongs to the new connection.
        assert!(!queue.leave_if_owner("alice", old_conn).await);
        assert_eq!(queue.len().await, 1);

        assert!(queue.leave_if_owner("alice", new_conn).await);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn even_number_of_joins_pairs_everyone_exactly_once() {
        let (queue, router, pool) = setup().await;
        let users = 8;

        let mut handles = Vec::new();
        for index in 0..users {
            let queue = queue.clone();
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                let (conn, _rx) = attach_new(&router).await;
                queue.join(&format!("user-{index}"), conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(queue.is_empty().await);
        assert_eq!(conversation_count(&pool).await, (users / 2) as i64);

        // Every participant row is distinct, so nobody was paired twice.
        let participant_rows: i64 =
            sqlx::query_scalar("SELECT COUNT(DISTINCT user_id) FROM conversation_participants")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(participant_rows, users as i64);
    }

    #[tokio::test]
    async fn odd_number_of_joins_leaves_one_waiting() {
        let (queue, router, pool) = setup().await;

        for index in 0..5 {
            let (conn, _rx) = attach_new(&router).await;
            queue.join(&format!("user-{index}"), conn).await;
        }

        assert_eq!(queue.len().await, 1);
        assert_eq!(conversation_count(&pool).await, 2);
    }

    #[tokio::test]
    async fn storage_failure_requeues_pair_at_the_front() {
        let (queue, router, pool) = setup().await;
        let (conn_a, mut rx_a) = attach_new(&router).await;
        let (conn_b, mut rx_b) = attach_new(&router).await;

        sqlx::query("DROP TABLE conversation_participants")
            .execute(&pool)
            .await
            .unwrap();

        queue.join("alice", conn_a).await;
        queue.join("bob", conn_b).await;

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::MatchFailed { .. }
        ));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::MatchFailed { .. }
        ));
        assert_eq!(queue.len().await, 2);

        // Once storage recovers, the requeued pair is retried first.
        run_migrations(&pool).await.unwrap();
        let (conn_c, _rx_c) = attach_new(&router).await;
        queue.join("carol", conn_c).await;

        let ServerEvent::MatchFound { conversation_id } = rx_a.try_recv().unwrap() else {
            panic!("expected matchFound for alice");
        };
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::MatchFound { .. }
        ));
        assert_eq!(queue.len().await, 1);

        let repo = ConversationRepository::new(pool);
        let conversation = repo.find_by_id(&conversation_id).await.unwrap().unwrap();
        assert_eq!(
            conversation.participant_ids,
            vec!["alice".to_string(), "bob".to_string()]
        );
    }
}
