//! Chat WebSocket handlers

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use parley_chats::{ChatError, FanoutCoordinator, SendMessage, ServerEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::state::GatewayState;

pub const INVALID_EVENT: &str = "INVALID_EVENT";

/// Client events received from WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat to keep connection alive
    Ping,
    /// Join the conversation and subscribe this connection to its room
    JoinRoom {
        conversation_id: String,
        user_id: String,
    },
    /// Unsubscribe this connection; membership is kept
    LeaveRoom {
        conversation_id: String,
        user_id: String,
    },
    SendMessage {
        conversation_id: String,
        sender_id: String,
        content: String,
        #[serde(default)]
        kind: Option<String>,
        /// Echoed back in the acknowledgement.
        #[serde(default)]
        client_ref: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct ChatSocketQuery {
    pub user_id: String,
}

/// Chat WebSocket connection handler
pub async fn chat_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ChatSocketQuery>,
) -> GatewayResult<Response> {
    let user_id = query.user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(GatewayError::InvalidRequest("user_id is required".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_chat_websocket(socket, state, user_id)))
}

/// Drive one connection: a writer task drains the outbound queue into the
/// socket while this task reads client events until the socket closes.
async fn handle_chat_websocket(socket: WebSocket, state: Arc<GatewayState>, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound, mut queue) = mpsc::channel::<ServerEvent>(state.outbound_buffer());

    let coordinator = state.coordinator();
    let connection_id = coordinator
        .registry()
        .register(&user_id, outbound.clone())
        .await;
    info!(connection_id = %connection_id, user_id = %user_id, "chat connection opened");

    let writer = tokio::spawn(async move {
        while let Some(event) = queue.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(error) => {
                    warn!(error = %error, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let hello = ServerEvent::Hello {
        connection_id: connection_id.clone(),
        user_id: user_id.clone(),
        instance_id: coordinator.instance_id().to_string(),
    };

    if outbound.send(hello).await.is_ok() {
        while let Some(frame) = receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(error) => {
                    debug!(connection_id = %connection_id, error = %error, "chat socket error");
                    break;
                }
            };

            let reply = match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(coordinator, &connection_id, &user_id, event).await,
                Err(error) => ServerEvent::error(INVALID_EVENT, format!("invalid event: {error}")),
            };

            if outbound.send(reply).await.is_err() {
                break;
            }
        }
    }

    let rooms = coordinator.disconnect(&connection_id).await;
    drop(outbound);
    writer.abort();
    info!(
        connection_id = %connection_id,
        user_id = %user_id,
        rooms = rooms.len(),
        "chat connection closed"
    );
}

/// Apply one client event on behalf of `connection_id` and build the direct reply.
pub async fn handle_client_event(
    coordinator: &FanoutCoordinator,
    connection_id: &str,
    connection_user: &str,
    event: ClientEvent,
) -> ServerEvent {
    let result = match event {
        ClientEvent::Ping => Ok(ServerEvent::Pong),
        ClientEvent::JoinRoom {
            conversation_id,
            user_id,
        } => coordinator
            .join_room(connection_id, &conversation_id, &user_id)
            .await
            .map(|join| ServerEvent::ChatJoined {
                conversation: join.conversation,
                messages: join.messages,
            }),
        ClientEvent::LeaveRoom {
            conversation_id,
            user_id,
        } => coordinator
            .leave_room(connection_id, &conversation_id, &user_id)
            .await
            .map(|()| ServerEvent::RoomLeft { conversation_id }),
        ClientEvent::SendMessage {
            conversation_id,
            sender_id,
            content,
            kind,
            client_ref,
        } => {
            if sender_id != connection_user {
                Err(ChatError::unauthorized(
                    "sender does not match the connection's user",
                ))
            } else {
                coordinator
                    .send_message(SendMessage {
                        conversation_id,
                        sender_id,
                        content,
                        kind,
                    })
                    .await
                    .map(|message| ServerEvent::MessageSent {
                        message,
                        client_ref,
                    })
            }
        }
    };

    result.unwrap_or_else(|error| {
        debug!(connection_id = %connection_id, code = error.code(), error = %error, "client event rejected");
        ServerEvent::error(error.code(), error.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_events_parse_from_tagged_json() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send_message","conversation_id":"c1","sender_id":"alice","content":"hi","client_ref":"r1"}"#,
        )
        .unwrap();

        assert_eq!(
            event,
            ClientEvent::SendMessage {
                conversation_id: "c1".to_string(),
                sender_id: "alice".to_string(),
                content: "hi".to_string(),
                kind: None,
                client_ref: Some("r1".to_string()),
            }
        );

        let ping: ClientEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"typing"}"#).is_err());
    }
}
