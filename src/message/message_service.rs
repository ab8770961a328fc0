use futures::{stream::BoxStream, TryStreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::conversation::ConversationDirectory;
use crate::error::{AppError, Result};
use crate::message::message_dto::SendMessageRequest;
use crate::message::message_models::Message;
use crate::message::message_repository::MessageStore;
use crate::websocket::{ChatEvent, DeliveryHub};

/// Service layer for message-related business logic.
#[derive(Clone)]
pub struct MessageService {
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationDirectory>,
    hub: DeliveryHub,
}

impl MessageService {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationDirectory>,
        hub: DeliveryHub,
    ) -> Self {
        Self {
            messages,
            conversations,
            hub,
        }
    }

    pub async fn send_message(&self, payload: SendMessageRequest) -> Result<Message> {
        let new_message = payload.into_new_message()?;

        let conversation = self
            .conversations
            .find_by_id(new_message.conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;

        if !conversation.has_participant(&new_message.sender) {
            return Err(AppError::Forbidden(
                "Sender is not a participant of this conversation".into(),
            ));
        }

        let message = self.messages.insert(new_message).await?;

        // The message is stored at this point; stale listing metadata is not worth failing the send.
        if let Err(e) = self.conversations.record_last_message(&message).await {
            tracing::warn!(
                conversation_id = %message.conversation_id,
                "Failed to update last message: {:?}",
                e
            );
        }

        self.hub.publish(ChatEvent::MessageCreated {
            message: message.clone(),
        });

        Ok(message)
    }

    pub async fn mark_seen(&self, message_id: Uuid) -> Result<Message> {
        let (message, flipped) = self
            .messages
            .mark_seen(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message not found".into()))?;

        if flipped {
            self.hub.publish(ChatEvent::MessageSeen {
                message_id: message.id,
                conversation_id: message.conversation_id,
            });
        }

        Ok(message)
    }

    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<MessageHistory> {
        self.conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Conversation not found".into()))?;

        Ok(MessageHistory {
            messages: self.messages.clone(),
            conversation_id,
        })
    }
}

/// Handle to a conversation's history. Every call to [`MessageHistory::stream`]
/// starts again from the oldest message.
#[derive(Clone)]
pub struct MessageHistory {
    messages: Arc<dyn MessageStore>,
    conversation_id: Uuid,
}

impl MessageHistory {
    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn stream(&self) -> BoxStream<'_, Result<Message>> {
        self.messages.stream_by_conversation(self.conversation_id)
    }

    pub async fn collect(&self) -> Result<Vec<Message>> {
        self.stream().try_collect().await
    }
}
