//! Entity definitions for persisted records

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A conversation between two or more users. For anonymous matches the
/// participant set is exactly two and never mutates after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub is_anonymous_match: bool,
    pub created_at: String,
}

impl Conversation {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_ids.iter().any(|id| id == user_id)
    }

    /// The counterpart of `user_id` in a two-party conversation.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        self.participant_ids
            .iter()
            .map(String::as_str)
            .find(|id| *id != user_id)
    }
}

/// A single persisted chat message. `receiver_id` is always another
/// participant of the referenced conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: String,
}

/// A feed-originated notification, delivered through the relay and kept for
/// the recipient's notification page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_post_id: Option<String>,
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Like,
    Comment,
    FriendRequest,
    FriendRequestAccepted,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
            NotificationType::FriendRequest => "friend_request",
            NotificationType::FriendRequestAccepted => "friend_request_accepted",
        }
    }
}

impl std::str::FromStr for NotificationType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(NotificationType::Like),
            "comment" => Ok(NotificationType::Comment),
            "friend_request" => Ok(NotificationType::FriendRequest),
            "friend_request_accepted" => Ok(NotificationType::FriendRequestAccepted),
            other => Err(StorageError::InvalidNotificationType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub related_post_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_of_returns_other_participant() {
        let conversation = Conversation {
            id: "c1".to_string(),
            participant_ids: vec!["alice".to_string(), "bob".to_string()],
            is_anonymous_match: true,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        };

        assert_eq!(conversation.peer_of("alice"), Some("bob"));
        assert_eq!(conversation.peer_of("bob"), Some("alice"));
        assert!(conversation.has_participant("alice"));
        assert!(!conversation.has_participant("carol"));
    }

    #[test]
    fn notification_type_round_trips_as_str() {
        for raw in ["like", "comment", "friend_request", "friend_request_accepted"] {
            let parsed: NotificationType = raw.parse().unwrap();
            assert_eq!(parsed.as_str(), raw);
        }
        assert!("poke".parse::<NotificationType>().is_err());
    }
}
