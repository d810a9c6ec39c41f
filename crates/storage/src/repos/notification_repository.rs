//! Notification repository for database operations.
//!
//! Notifications are created by the feed and friend subsystems and delivered
//! through the relay router; this repository only persists and reads them.

use sqlx::{Row, SqlitePool};

use crate::entities::{CreateNotificationRequest, Notification};
use crate::error::StorageResult;

/// Repository for notification database operations
#[derive(Clone)]
pub struct NotificationRepository {
    pool: SqlitePool,
}

impl NotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new, unread notification.
    pub async fn create(&self, request: &CreateNotificationRequest) -> StorageResult<Notification> {
        let id = cuid2::create_id();
        let created_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO notifications (id, recipient_id, sender_id, type, related_post_id, is_read, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(&id)
        .bind(&request.recipient_id)
        .bind(&request.sender_id)
        .bind(request.notification_type.as_str())
        .bind(&request.related_post_id)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        Ok(Notification {
            id,
            recipient_id: request.recipient_id.clone(),
            sender_id: request.sender_id.clone(),
            notification_type: request.notification_type,
            related_post_id: request.related_post_id.clone(),
            is_read: false,
            created_at,
        })
    }

    /// Most recent notifications for a recipient.
    pub async fn find_by_recipient(
        &self,
        recipient_id: &str,
        limit: u32,
    ) -> StorageResult<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, recipient_id, sender_id, type, related_post_id, is_read, created_at
             FROM notifications WHERE recipient_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(recipient_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut notifications = Vec::with_capacity(rows.len());
        for row in rows {
            let type_str: String = row.try_get("type")?;
            notifications.push(Notification {
                id: row.try_get("id")?,
                recipient_id: row.try_get("recipient_id")?,
                sender_id: row.try_get("sender_id")?,
                notification_type: type_str.parse()?,
                related_post_id: row.try_get("related_post_id")?,
                is_read: row.try_get("is_read")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(notifications)
    }

    /// Mark every unread notification for a recipient as read.
    pub async fn mark_all_as_read(&self, recipient_id: &str) -> StorageResult<u32> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ? AND is_read = 0",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::NotificationType;
    use crate::migrations::run_migrations;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> NotificationRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        NotificationRepository::new(pool)
    }

    fn like_request(recipient: &str) -> CreateNotificationRequest {
        CreateNotificationRequest {
            recipient_id: recipient.to_string(),
            sender_id: "sender".to_string(),
            notification_type: NotificationType::Like,
            related_post_id: Some("post-1".to_string()),
        }
    }

    #[tokio::test]
    async fn create_and_list_notifications() {
        let repo = create_test_repo().await;

        let created = repo.create(&like_request("alice")).await.unwrap();
        assert!(!created.is_read);
        assert_eq!(created.notification_type, NotificationType::Like);

        let listed = repo.find_by_recipient("alice", 10).await.unwrap();
        assert_eq!(listed, vec![created]);

        assert!(repo.find_by_recipient("bob", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_all_as_read_only_touches_recipient() {
        let repo = create_test_repo().await;
        repo.create(&like_request("alice")).await.unwrap();
        repo.create(&like_request("alice")).await.unwrap();
        repo.create(&like_request("bob")).await.unwrap();

        let marked = repo.mark_all_as_read("alice").await.unwrap();
        assert_eq!(marked, 2);

        assert!(repo
            .find_by_recipient("alice", 10)
            .await
            .unwrap()
            .iter()
            .all(|n| n.is_read));
        assert!(repo
            .find_by_recipient("bob", 10)
            .await
            .unwrap()
            .iter()
            .all(|n| !n.is_read));
    }
}
