//! Conversation REST endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use parley_chats::CreateConversation;
use parley_database::Conversation;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ErrorResponse, GatewayResult};
use crate::state::GatewayState;

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub participant_ids: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            name: conversation.name,
            description: conversation.description,
            kind: conversation.kind.to_string(),
            participant_ids: conversation.participant_ids,
            is_active: conversation.is_active,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub name: String,
    pub description: Option<String>,
    /// `public`, `private` or `group` (default).
    pub kind: Option<String>,
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct JoinConversationRequest {
    pub user_id: String,
}

/// The requesting user. Transport authentication happens in front of this service.
#[derive(Debug, Deserialize, IntoParams)]
pub struct RequesterQuery {
    pub user_id: String,
}

/// Create conversation routes
pub fn create_conversation_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/:conversation_id", get(get_conversation))
        .route(
            "/api/conversations/:conversation_id/join",
            post(join_conversation),
        )
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "Conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Invalid name or unknown participant", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    )
)]
pub async fn create_conversation(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<CreateConversationRequest>,
) -> GatewayResult<(StatusCode, Json<ConversationResponse>)> {
    let conversation = state
        .coordinator()
        .create_conversation(CreateConversation {
            name: request.name,
            description: request.description,
            kind: request.kind,
            participant_ids: request.participant_ids,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(conversation.into())))
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "Conversations",
    params(RequesterQuery),
    responses(
        (status = 200, description = "Conversations the user participates in", body = Vec<ConversationResponse>)
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RequesterQuery>,
) -> GatewayResult<Json<Vec<ConversationResponse>>> {
    let conversations = state
        .coordinator()
        .list_conversations(&query.user_id)
        .await?;

    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{conversation_id}",
    tag = "Conversations",
    params(
        ("conversation_id" = String, Path, description = "Conversation ID"),
        RequesterQuery
    ),
    responses(
        (status = 200, description = "Conversation", body = ConversationResponse),
        (status = 403, description = "Not a participant", body = ErrorResponse)
    )
)]
pub async fn get_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<RequesterQuery>,
) -> GatewayResult<Json<ConversationResponse>> {
    let conversation = state
        .coordinator()
        .get_conversation(&conversation_id, &query.user_id)
        .await?;

    Ok(Json(conversation.into()))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{conversation_id}/join",
    tag = "Conversations",
    params(("conversation_id" = String, Path, description = "Conversation ID")),
    request_body = JoinConversationRequest,
    responses(
        (status = 200, description = "Participant added, or already present", body = ConversationResponse),
        (status = 404, description = "Unknown user or conversation", body = ErrorResponse)
    )
)]
pub async fn join_conversation(
    Path(conversation_id): Path<String>,
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<JoinConversationRequest>,
) -> GatewayResult<Json<ConversationResponse>> {
    let conversation = state
        .coordinator()
        .join_conversation(&conversation_id, &request.user_id)
        .await?;

    Ok(Json(conversation.into()))
}
