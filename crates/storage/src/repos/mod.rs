//! Repository implementations

pub mod conversation_repository;
pub mod notification_repository;

pub use conversation_repository::ConversationRepository;
pub use notification_repository::NotificationRepository;
