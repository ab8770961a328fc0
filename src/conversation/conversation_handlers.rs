use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use super::{
    conversation_dto::{ConversationListResponse, OpenConversationRequest},
    conversation_models::Conversation,
};
use crate::{
    error::{AppError, Result},
    state::AppState,
};

/// Open the conversation between a buyer and a seller
#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = OpenConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = Conversation),
        (status = 200, description = "Conversation already existed", body = Conversation),
        (status = 400, description = "Invalid participants")
    )
)]
pub async fn open_conversation(
    State(state): State<AppState>,
    payload: std::result::Result<Json<OpenConversationRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload?;
    let (buyer_id, seller_id) = payload.participants()?;
    let (conversation, created) = state.conversations.open(buyer_id, seller_id).await?;

    let status = if created {
        tracing::info!(conversation_id = %conversation.id, "Conversation created");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(conversation)))
}

/// Get a conversation by ID
#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Conversation", body = Conversation),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn get_conversation(
    State(state): State<AppState>,
    conversation_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Conversation>> {
    let Path(conversation_id) = conversation_id?;
    let conversation = state
        .conversations
        .find_by_id(conversation_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Conversation not found".to_string()))?;

    Ok(Json(conversation))
}

/// List a participant's conversations, most recent activity first
#[utoipa::path(
    get,
    path = "/api/participants/{participant_id}/conversations",
    tag = "conversations",
    params(
        ("participant_id" = String, Path, description = "Buyer or seller ID")
    ),
    responses(
        (status = 200, description = "Conversations", body = ConversationListResponse)
    )
)]
pub async fn list_participant_conversations(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> Result<Json<ConversationListResponse>> {
    let conversations = state.conversations.find_by_participant(&participant_id).await?;

    Ok(Json(ConversationListResponse {
        participant_id,
        conversations,
    }))
}
