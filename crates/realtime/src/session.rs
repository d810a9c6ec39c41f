//! Per-connection session state machine.
//!
//! Each live connection owns one `ConnectionSession`:
//! Connected → Identified → InQueue → Chatting → Closed. Events that are not
//! valid in the current state are rejected with an `error` event and leave
//! the state untouched; nothing a single client sends can crash the session
//! or affect other connections.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{RealtimeError, RealtimeResult};
use crate::events::{ClientEvent, ConnectionId, QueueJoinStatus, RoomId, ServerEvent, UserId};
use crate::presence::PresenceRegistry;
use crate::queue::PairingQueue;
use crate::router::RelayRouter;
use vlant_storage::ConversationRepository;

#[derive(Debug, Clone, PartialEq)]
enum SessionState {
    /// Socket open, identity unknown.
    Connected,
    Identified {
        user_id: UserId,
    },
    InQueue {
        user_id: UserId,
    },
    Chatting {
        user_id: UserId,
        room_id: RoomId,
    },
    Closed,
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::Identified { .. } => "identified",
            SessionState::InQueue { .. } => "inQueue",
            SessionState::Chatting { .. } => "chatting",
            SessionState::Closed => "closed",
        }
    }

    fn user_id(&self) -> Option<&UserId> {
        match self {
            SessionState::Connected | SessionState::Closed => None,
            SessionState::Identified { user_id }
            | SessionState::InQueue { user_id }
            | SessionState::Chatting { user_id, .. } => Some(user_id),
        }
    }
}

/// One object per live connection. Owns the identity binding, the room
/// membership, and the lifecycle transitions.
pub struct ConnectionSession {
    connection_id: ConnectionId,
    state: SessionState,
    out_tx: mpsc::Sender<ServerEvent>,
    registry: PresenceRegistry,
    router: RelayRouter,
    queue: PairingQueue,
    conversations: ConversationRepository,
}

impl ConnectionSession {
    pub fn new(
        connection_id: ConnectionId,
        out_tx: mpsc::Sender<ServerEvent>,
        registry: PresenceRegistry,
        router: RelayRouter,
        queue: PairingQueue,
        conversations: ConversationRepository,
    ) -> Self {
        Self {
            connection_id,
            state: SessionState::Connected,
            out_tx,
            registry,
            router,
            queue,
            conversations,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Dispatch one client event. Protocol and storage failures are reported
    /// to this client only; the connection stays open.
    pub async fn handle_event(&mut self, event: ClientEvent) {
        if let Err(error) = self.dispatch(event).await {
            debug!(
                connection_id = %self.connection_id,
                state = self.state.name(),
                %error,
                "client event rejected"
            );
            self.send_to_self(ServerEvent::Error {
                message: error.to_string(),
            })
            .await;
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> RealtimeResult<()> {
        match event {
            ClientEvent::Ping => {
                self.send_to_self(ServerEvent::Pong).await;
                Ok(())
            }
            ClientEvent::Identify { user_id } => self.identify(user_id).await,
            ClientEvent::JoinQueue { user_id } => self.join_queue(user_id).await,
            ClientEvent::LeaveQueue => self.leave_queue().await,
            ClientEvent::JoinRoom { room_id } => self.join_room(room_id).await,
            ClientEvent::SendMessage {
                conversation_id,
                sender_id,
                content,
            } => self.send_message(conversation_id, sender_id, content).await,
        }
    }

    async fn identify(&mut self, user_id: UserId) -> RealtimeResult<()> {
        if !matches!(self.state, SessionState::Connected) {
            return Err(self.invalid("identify"));
        }

        self.registry.register(&user_id, self.connection_id).await;
        self.state = SessionState::Identified { user_id };
        self.broadcast_online_users().await;
        Ok(())
    }

    async fn join_queue(&mut self, user_id: UserId) -> RealtimeResult<()> {
        let bound = match &self.state {
            SessionState::Identified { user_id } | SessionState::InQueue { user_id } => {
                user_id.clone()
            }
            _ => return Err(self.invalid("joinQueue")),
        };
        if bound != user_id {
            return Err(RealtimeError::IdentityMismatch);
        }

        self.state = SessionState::InQueue {
            user_id: bound.clone(),
        };
        let status = self.queue.join(&bound, self.connection_id).await;
        self.send_to_self(ServerEvent::QueueStatus { status }).await;
        if status == QueueJoinStatus::Enqueued {
            debug!(connection_id = %self.connection_id, user_id = %bound, "entered pairing queue");
        }
        Ok(())
    }

    async fn leave_queue(&mut self) -> RealtimeResult<()> {
        match &self.state {
            SessionState::InQueue { user_id } => {
                let user_id = user_id.clone();
                self.queue.leave(&user_id).await;
                self.state = SessionState::Identified { user_id };
                Ok(())
            }
            // leave is idempotent; outside the queue it is a no-op.
            SessionState::Identified { .. } | SessionState::Chatting { .. } => Ok(()),
            _ => Err(self.invalid("leaveQueue")),
        }
    }

    async fn join_room(&mut self, room_id: RoomId) -> RealtimeResult<()> {
        let user_id = match &self.state {
            SessionState::Identified { user_id }
            | SessionState::InQueue { user_id }
            | SessionState::Chatting { user_id, .. } => user_id.clone(),
            _ => return Err(self.invalid("joinRoom")),
        };

        let conversation = self
            .conversations
            .find_by_id(&room_id)
            .await?
            .ok_or(RealtimeError::UnknownConversation)?;
        if !conversation.has_participant(&user_id) {
            return Err(RealtimeError::UnknownConversation);
        }

        // Entering a room is an implicit cancel; a stale queue entry could
        // otherwise pair later and yank the user into a second room.
        if matches!(self.state, SessionState::InQueue { .. }) {
            self.queue.leave(&user_id).await;
        }

        self.enter_room(user_id, room_id).await;
        Ok(())
    }

    async fn send_message(
        &mut self,
        conversation_id: String,
        sender_id: UserId,
        content: String,
    ) -> RealtimeResult<()> {
        let (user_id, room_id) = match &self.state {
            SessionState::Chatting { user_id, room_id } => (user_id.clone(), room_id.clone()),
            _ => return Err(self.invalid("sendMessage")),
        };
        if sender_id != user_id {
            return Err(RealtimeError::IdentityMismatch);
        }
        if conversation_id != room_id {
            return Err(RealtimeError::WrongRoom);
        }

        let conversation = self
            .conversations
            .find_by_id(&conversation_id)
            .await?
            .ok_or(RealtimeError::UnknownConversation)?;
        let receiver_id = conversation
            .peer_of(&user_id)
            .ok_or(RealtimeError::UnknownConversation)?
            .to_string();

        // Persist first; only a committed message is relayed, so peers never
        // see a message that is missing from history.
        let message = self
            .conversations
            .append_message(&conversation_id, &user_id, &receiver_id, &content)
            .await?;

        self.router
            .send_to_room_except(
                &room_id,
                self.connection_id,
                ServerEvent::NewMessage {
                    sender_id: message.sender_id,
                    content: message.content,
                    created_at: message.created_at,
                },
            )
            .await;
        Ok(())
    }

    /// Called by the connection loop when a `matchFound` event addressed to
    /// this connection passes through: the session joins the conversation
    /// room and moves to `Chatting`.
    pub async fn on_match_found(&mut self, conversation_id: String) {
        let user_id = match self.state.user_id() {
            Some(user_id) => user_id.clone(),
            None => {
                debug!(
                    connection_id = %self.connection_id,
                    "matchFound for a connection without identity dropped"
                );
                return;
            }
        };
        self.enter_room(user_id, conversation_id).await;
    }

    /// Transport-level disconnect: unregister presence, leave the queue if
    /// waiting, leave all rooms, notify remaining room members.
    pub async fn disconnect(&mut self) {
        let user_id = self.state.user_id().cloned();

        let rooms = self.router.detach(self.connection_id).await;
        for room_id in rooms {
            self.router
                .send_to_room(&room_id, ServerEvent::PeerLeft { room_id: room_id.clone() })
                .await;
        }

        self.registry.unregister(self.connection_id).await;
        if let Some(user_id) = user_id {
            // Only the connection the queue entry points at may take it down;
            // after a re-join from a new tab the old tab's disconnect must
            // leave the entry in place.
            self.queue
                .leave_if_owner(&user_id, self.connection_id)
                .await;
            self.broadcast_online_users().await;
        }
        self.state = SessionState::Closed;
        debug!(connection_id = %self.connection_id, "session closed");
    }

    async fn enter_room(&mut self, user_id: UserId, room_id: RoomId) {
        if let SessionState::Chatting {
            room_id: previous, ..
        } = &self.state
        {
            if previous != &room_id {
                self.router.leave_room(previous, self.connection_id).await;
            }
        }

        self.router.join_room(&room_id, self.connection_id).await;
        self.send_to_self(ServerEvent::RoomJoined {
            room_id: room_id.clone(),
        })
        .await;
        self.state = SessionState::Chatting { user_id, room_id };
    }

    async fn broadcast_online_users(&self) {
        let user_ids = self.registry.online_user_ids().await;
        self.router
            .broadcast_all(ServerEvent::OnlineUsers { user_ids })
            .await;
    }

    // try_send so a saturated outbound buffer can never stall the event
    // loop that is responsible for draining it.
    async fn send_to_self(&self, event: ServerEvent) {
        if self.out_tx.try_send(event).is_err() {
            debug!(connection_id = %self.connection_id, "outbound channel closed or saturated");
        }
    }

    fn invalid(&self, event: &'static str) -> RealtimeError {
        RealtimeError::InvalidState {
            event,
            state: self.state.name(),
        }
    }
}
