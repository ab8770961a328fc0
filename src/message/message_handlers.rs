use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Sse,
    },
    Json,
};
use futures::stream::Stream;
use std::convert::Infallible;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    message::{message_dto::SendMessageRequest, message_models::Message},
    state::AppState,
};

/// Send a message to a conversation
#[utoipa::path(
    post,
    path = "/api/messages",
    tag = "messages",
    request_body = SendMessageRequest,
    responses(
        (status = 201, description = "Message sent successfully", body = Message),
        (status = 400, description = "Missing conversation, sender or body"),
        (status = 403, description = "Sender is not a participant"),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn send_message(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(payload) = payload?;
    let message = state.message_service.send_message(payload).await?;

    tracing::debug!(
        message_id = %message.id,
        conversation_id = %message.conversation_id,
        "Message sent"
    );

    Ok((StatusCode::CREATED, Json(message)))
}

/// List a conversation's messages, oldest first
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Message history", body = Vec<Message>),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn list_messages(
    State(state): State<AppState>,
    conversation_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<Message>>> {
    let Path(conversation_id) = conversation_id?;
    let history = state.message_service.list_messages(conversation_id).await?;
    let messages = history.collect().await?;

    tracing::debug!(
        conversation_id = %history.conversation_id(),
        count = messages.len(),
        "Listed messages"
    );

    Ok(Json(messages))
}

/// Mark a message as seen
#[utoipa::path(
    patch,
    path = "/api/messages/{id}/seen",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Message ID")
    ),
    responses(
        (status = 200, description = "Message marked as seen", body = Message),
        (status = 404, description = "Message not found")
    )
)]
pub async fn mark_message_seen(
    State(state): State<AppState>,
    message_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Message>> {
    let Path(message_id) = message_id?;
    let message = state.message_service.mark_seen(message_id).await?;
    Ok(Json(message))
}

/// Real-time conversation stream (SSE)
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/stream",
    tag = "messages",
    params(
        ("id" = Uuid, Path, description = "Conversation ID")
    ),
    responses(
        (status = 200, description = "Event stream established"),
        (status = 404, description = "Conversation not found")
    )
)]
pub async fn conversation_stream(
    State(state): State<AppState>,
    conversation_id: std::result::Result<Path<Uuid>, PathRejection>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let Path(conversation_id) = conversation_id?;
    state
        .conversations
        .find_by_id(conversation_id)
        .await?
        .ok_or(AppError::NotFound("Conversation not found".to_string()))?;

    let rx = state.hub.subscribe(conversation_id);
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => {
            let json = serde_json::to_string(&event).ok()?;
            Some(Ok(Event::default().event(event.kind()).data(json)))
        }
        Err(e) => {
            tracing::debug!("SSE subscriber skipped events: {:?}", e);
            None
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
