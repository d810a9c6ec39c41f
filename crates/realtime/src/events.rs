//! Wire events exchanged over the realtime channel.
//!
//! Event and field names match the Socket.IO-style protocol the web client
//! speaks (`identify`, `joinQueue`, `matchFound`, ...).

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vlant_storage::Notification;

/// User identity as issued by the auth collaborator. This core trusts it.
pub type UserId = String;

/// One live socket. A user may hold several concurrently.
pub type ConnectionId = Uuid;

/// Connection-level grouping used to fan out chat messages; named after the
/// conversation id, never persisted.
pub type RoomId = String;

/// Events received from clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Bind a verified user identity to this connection.
    #[serde(rename_all = "camelCase")]
    Identify { user_id: UserId },
    /// Enter the anonymous pairing queue.
    #[serde(rename_all = "camelCase")]
    JoinQueue { user_id: UserId },
    /// Cancel a pending match.
    LeaveQueue,
    /// Join the fan-out room of an existing conversation.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },
    /// Send a chat message; persisted before it is relayed.
    #[serde(rename_all = "camelCase")]
    SendMessage {
        conversation_id: String,
        sender_id: UserId,
        content: String,
    },
    /// Heartbeat.
    Ping,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Identify { .. } => "identify",
            ClientEvent::JoinQueue { .. } => "joinQueue",
            ClientEvent::LeaveQueue => "leaveQueue",
            ClientEvent::JoinRoom { .. } => "joinRoom",
            ClientEvent::SendMessage { .. } => "sendMessage",
            ClientEvent::Ping => "ping",
        }
    }
}

/// Events pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Sent once after the socket upgrade.
    #[serde(rename_all = "camelCase")]
    Hello { connection_id: String },
    /// Heartbeat response.
    Pong,
    /// Broadcast whenever the set of online users changes.
    #[serde(rename_all = "camelCase")]
    OnlineUsers { user_ids: Vec<UserId> },
    /// Acknowledgement of a `joinQueue` request.
    QueueStatus { status: QueueJoinStatus },
    /// Both paired connections receive this with the same conversation id.
    #[serde(rename_all = "camelCase")]
    MatchFound { conversation_id: String },
    /// Pairing was attempted but conversation creation failed; the entry is
    /// back at the front of the queue.
    MatchFailed { message: String },
    #[serde(rename_all = "camelCase")]
    RoomJoined { room_id: RoomId },
    /// Relayed to the other members of a room after persistence commits.
    #[serde(rename_all = "camelCase")]
    NewMessage {
        sender_id: UserId,
        content: String,
        created_at: String,
    },
    /// The last other member of the room disconnected. The conversation is
    /// kept; further sends are persisted but not delivered.
    #[serde(rename_all = "camelCase")]
    PeerLeft { room_id: RoomId },
    #[serde(rename_all = "camelCase")]
    StatsUpdate {
        online_count: usize,
        queue_count: usize,
    },
    /// Feed-originated notification, passed through verbatim.
    Notification { notification: Notification },
    Error { message: String },
}

/// Outcome of a `joinQueue` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueueJoinStatus {
    /// Newly appended to the queue.
    Enqueued,
    /// Already queued; the entry now points at this connection.
    StillWaiting,
}
