//! Error types for the storage layer

use thiserror::Error;

/// Errors surfaced by the conversation and notification repositories.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("conversation not found")]
    ConversationNotFound,

    #[error("a conversation requires at least two distinct participants")]
    InvalidParticipants,

    #[error("user is not a participant in this conversation")]
    NotParticipant,

    #[error("invalid notification type: {0}")]
    InvalidNotificationType(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
