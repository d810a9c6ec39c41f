//! WebSocket endpoint: one task per connection, owning the session state
//! machine and draining the outbound channel the router writes into.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;
use vlant_realtime::{ClientEvent, ConnectionSession, ServerEvent};

use crate::AppState;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(state.outbound_buffer);
    state.router.attach(connection_id, out_tx.clone()).await;

    let mut session = ConnectionSession::new(
        connection_id,
        out_tx,
        state.registry.clone(),
        state.router.clone(),
        state.queue.clone(),
        state.conversations.clone(),
    );

    info!(%connection_id, "websocket connected");
    if send_event(
        &mut socket,
        &ServerEvent::Hello {
            connection_id: connection_id.to_string(),
        },
    )
    .await
    .is_err()
    {
        session.disconnect().await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => session.handle_event(event).await,
                            Err(error) => {
                                debug!(%connection_id, %error, "unparseable client frame");
                                let rejected = ServerEvent::Error {
                                    message: "malformed event".to_string(),
                                };
                                if send_event(&mut socket, &rejected).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    // Transport-level pings are answered by axum itself.
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(error)) => {
                        debug!(%connection_id, %error, "websocket receive error");
                        break;
                    }
                }
            }
            outgoing = out_rx.recv() => {
                let Some(event) = outgoing else { break };
                // A match moves the session into the conversation room before
                // the client learns about it, so the first message cannot
                // race the room membership.
                if let ServerEvent::MatchFound { conversation_id } = &event {
                    session.on_match_found(conversation_id.clone()).await;
                }
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    session.disconnect().await;
    info!(%connection_id, "websocket closed");
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(event).unwrap_or_else(|error| {
        debug!(%error, "failed to encode server event");
        r#"{"type":"error","message":"internal encoding failure"}"#.to_string()
    });
    socket.send(Message::Text(payload)).await
}
