//! Message REST endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use parley_chats::SendMessage;
use parley_database::Message;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::rest::conversation::RequesterQuery;
use crate::state::GatewayState;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub position: i64,
    pub is_edited: bool,
    pub edited_at: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: message.content,
            kind: message.kind.to_string(),
            position: message.position,
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            is_deleted: message.is_deleted,
            deleted_at: message.deleted_at,
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub content: String,
    /// `text` (default), `image`, `file` or `system`.
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateMessageRequest {
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListMessagesQuery {
    pub user_id: String,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RecentMessagesQuery {
    pub user_id: String,
    pub limit: Option<i64>,
}

/// Create message routes
pub fn create_message_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/api/conversations/:conversation_id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/api/conversations/:conversation_id/messages/recent",
            get(recent_messages),
        )
        .route(
            "/api/conversations/:conversation_id/messages/:message_id",
            patch(update_message).delete(delete_message),
        )
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/messages",
    tag = "Messages",
    params(("conversation_id" = String, Path, description = "Conversation ID")),
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message persisted with its position", body = MessageResponse),
        (status = 400, description = "Empty content or unknown kind", body = ErrorResponse),
        (status = 403, description = "Sender is not a participant", body = ErrorResponse),
        (status = 503, description = "Sequencing or storage unavailable, retry", body = ErrorResponse)
    )
)]
pub async fn send_message(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<SendMessageRequest>,
) -> GatewayResult<(StatusCode, Json<MessageResponse>)> {
    let message = state
        .coordinator()
        .send_message(SendMessage {
            conversation_id,
            sender_id: request.sender_id,
            content: request.content,
            kind: request.kind,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message.into())))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages",
    tag = "Messages",
    params(
        ("conversation_id" = String, Path, description = "Conversation ID"),
        ListMessagesQuery
    ),
    responses(
        (status = 200, description = "One page of history in position order", body = Vec<MessageResponse>),
        (status = 400, description = "Invalid limit or offset", body = ErrorResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn list_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<ListMessagesQuery>,
) -> GatewayResult<Json<Vec<MessageResponse>>> {
    let messages = state
        .coordinator()
        .list_messages(
            &conversation_id,
            &query.user_id,
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}/messages/recent",
    tag = "Messages",
    params(
        ("conversation_id" = String, Path, description = "Conversation ID"),
        RecentMessagesQuery
    ),
    responses(
        (status = 200, description = "Most recent messages, oldest first", body = Vec<MessageResponse>),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn recent_messages(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RecentMessagesQuery>,
) -> GatewayResult<Json<Vec<MessageResponse>>> {
    let messages = state
        .coordinator()
        .recent_messages(
            &conversation_id,
            &query.user_id,
            query.limit.unwrap_or(DEFAULT_PAGE_LIMIT),
        )
        .await?;

    Ok(Json(messages.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    patch,
    path = "/api/conversations/{conversation_id}/messages/{message_id}",
    tag = "Messages",
    params(
        ("conversation_id" = String, Path, description = "Conversation ID"),
        ("message_id" = String, Path, description = "Message ID")
    ),
    request_body = UpdateMessageRequest,
    responses(
        (status = 200, description = "Message edited", body = MessageResponse),
        (status = 403, description = "Only the sender may edit", body = ErrorResponse),
        (status = 404, description = "Message not found", body = ErrorResponse)
    )
)]
pub async fn update_message(
    Path((conversation_id, message_id)): Path<(String, String)>,
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<UpdateMessageRequest>,
) -> GatewayResult<Json<MessageResponse>> {
    let message = state
        .coordinator()
        .edit_message(
            &conversation_id,
            &message_id,
            &request.user_id,
            &request.content,
        )
        .await?;

    Ok(Json(message.into()))
}

#[utoipa::path(
    delete,
    path = "/api/conversations/{conversation_id}/messages/{message_id}",
    tag = "Messages",
    params(
        ("conversation_id" = String, Path, description = "Conversation ID"),
        ("message_id" = String, Path, description = "Message ID"),
        RequesterQuery
    ),
    responses(
        (status = 200, description = "Message soft-deleted", body = MessageResponse),
        (status = 403, description = "Only the sender may delete", body = ErrorResponse),
        (status = 404, description = "Message not found", body = ErrorResponse)
    )
)]
pub async fn delete_message(
    Path((conversation_id, message_id)): Path<(String, String)>,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RequesterQuery>,
) -> GatewayResult<Json<MessageResponse>> {
    let message = state
        .coordinator()
        .delete_message(&conversation_id, &message_id, &query.user_id)
        .await?;

    Ok(Json(message.into()))
}
