//! Vlant Storage Crate
//!
//! Persisted conversation, message, and notification records for the Vlant
//! realtime core, backed by SQLite through sqlx. The realtime layer treats
//! this crate as its store adapter: pairing creates conversations here and
//! message relay is gated on successful persistence.

use sqlx::SqlitePool;
use vlant_config::DatabaseConfig;

pub mod connection;
pub mod entities;
pub mod error;
pub mod migrations;
pub mod repos;

pub use connection::prepare_database;
pub use migrations::run_migrations;

pub use entities::{
    ChatMessage, Conversation, CreateNotificationRequest, Notification, NotificationType,
};
pub use error::{StorageError, StorageResult};
pub use repos::{ConversationRepository, NotificationRepository};

pub use sqlx::SqlitePool as Pool;

/// Connect to the database and apply the schema.
pub async fn initialize_storage(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let pool = prepare_database(config).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initialize_storage_in_memory() {
        let config = DatabaseConfig {
            url: "sqlite://:memory:".to_string(),
            max_connections: 1,
        };

        let pool = initialize_storage(&config).await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM conversations")
            .fetch_one(&pool)
            .await
            .unwrap();
    }
}
