//! Conversation repository for database operations.
//!
//! This is the store adapter the realtime core calls synchronously: pairing
//! creates conversations here, and message relay is gated on `append_message`
//! committing successfully.

use sqlx::{Row, SqlitePool};

use crate::entities::{ChatMessage, Conversation};
use crate::error::{StorageError, StorageResult};

/// Repository for conversation and message database operations
#[derive(Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a conversation with an ordered, immutable participant set.
    pub async fn create(
        &self,
        participant_ids: &[String],
        is_anonymous_match: bool,
    ) -> StorageResult<Conversation> {
        let mut distinct = participant_ids.to_vec();
        distinct.sort();
        distinct.dedup();
        if participant_ids.len() < 2 || distinct.len() != participant_ids.len() {
            return Err(StorageError::InvalidParticipants);
        }

        let id = cuid2::create_id();
        let created_at = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO conversations (id, is_anonymous_match, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(is_anonymous_match)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;

        for (position, user_id) in participant_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, user_id, position) VALUES (?, ?, ?)",
            )
            .bind(&id)
            .bind(user_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(Conversation {
            id,
            participant_ids: participant_ids.to_vec(),
            is_anonymous_match,
            created_at,
        })
    }

    /// Find a conversation by its id, with participants in creation order.
    pub async fn find_by_id(&self, conversation_id: &str) -> StorageResult<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, is_anonymous_match, created_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let participant_ids = self.participants(conversation_id).await?;

        Ok(Some(Conversation {
            id: row.try_get("id")?,
            participant_ids,
            is_anonymous_match: row.try_get("is_anonymous_match")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    /// Find an existing conversation containing both users, if any.
    pub async fn find_by_participants(
        &self,
        first: &str,
        second: &str,
    ) -> StorageResult<Option<Conversation>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT c.id FROM conversations c
             JOIN conversation_participants p1 ON p1.conversation_id = c.id AND p1.user_id = ?
             JOIN conversation_participants p2 ON p2.conversation_id = c.id AND p2.user_id = ?
             ORDER BY c.created_at LIMIT 1",
        )
        .bind(first)
        .bind(second)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => self.find_by_id(&id).await,
            None => Ok(None),
        }
    }

    /// Append a message to a conversation. Fails if the conversation does not
    /// exist or either endpoint is not a participant; nothing is persisted in
    /// that case.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
    ) -> StorageResult<ChatMessage> {
        let conversation = self
            .find_by_id(conversation_id)
            .await?
            .ok_or(StorageError::ConversationNotFound)?;

        if !conversation.has_participant(sender_id) || !conversation.has_participant(receiver_id) {
            return Err(StorageError::NotParticipant);
        }

        let id = cuid2::create_id();
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(ChatMessage {
            id,
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    /// Messages of a conversation in persistence-commit order.
    pub async fn messages(&self, conversation_id: &str) -> StorageResult<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, receiver_id, content, created_at
             FROM messages WHERE conversation_id = ? ORDER BY seq",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(ChatMessage {
                id: row.try_get("id")?,
                conversation_id: row.try_get("conversation_id")?,
                sender_id: row.try_get("sender_id")?,
                receiver_id: row.try_get("receiver_id")?,
                content: row.try_get("content")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(messages)
    }

    async fn participants(&self, conversation_id: &str) -> StorageResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ? ORDER BY position",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
