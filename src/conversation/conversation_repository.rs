use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::conversation_models::Conversation;
use crate::{error::Result, message::message_models::Message};

/// Maps (buyer, seller) pairs to conversations and keeps last-message metadata.
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    /// Returns the conversation for the pair, creating it when missing.
    /// The flag is `true` when this call created it.
    async fn open(&self, buyer_id: &str, seller_id: &str) -> Result<(Conversation, bool)>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations where the participant is buyer or seller, newest activity first.
    async fn find_by_participant(&self, participant_id: &str) -> Result<Vec<Conversation>>;

    /// Records the message as the conversation's latest unless a newer one
    /// is already recorded.
    async fn record_last_message(&self, message: &Message) -> Result<()>;
}

#[derive(Clone)]
pub struct PgConversationDirectory {
    pool: PgPool,
}

impl PgConversationDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationDirectory for PgConversationDirectory {
    async fn open(&self, buyer_id: &str, seller_id: &str) -> Result<(Conversation, bool)> {
        let created = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (buyer_id, seller_id)
             VALUES ($1, $2)
             ON CONFLICT (buyer_id, seller_id) DO NOTHING
             RETURNING *",
        )
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(conversation) = created {
            return Ok((conversation, true));
        }

        let existing = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE buyer_id = $1 AND seller_id = $2",
        )
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_one(&self.pool)
        .await?;

        Ok((existing, false))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        let conversation =
            sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(conversation)
    }

    async fn find_by_participant(&self, participant_id: &str) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations
             WHERE buyer_id = $1 OR seller_id = $1
             ORDER BY updated_at DESC",
        )
        .bind(participant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(conversations)
    }

    async fn record_last_message(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "UPDATE conversations
             SET last_message = $2,
                 last_message_id = $3,
                 last_message_sender = $4,
                 last_message_at = $5,
                 updated_at = NOW()
             WHERE id = $1
               AND (last_message_at IS NULL OR last_message_at <= $5)",
        )
        .bind(message.conversation_id)
        .bind(message.preview())
        .bind(message.id)
        .bind(&message.sender)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Process-local directory used when no database is configured, and in tests.
#[derive(Clone, Default)]
pub struct InMemoryConversationDirectory {
    by_id: Arc<DashMap<Uuid, Conversation>>,
    by_pair: Arc<DashMap<(String, String), Uuid>>,
}

impl InMemoryConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationDirectory for InMemoryConversationDirectory {
    async fn open(&self, buyer_id: &str, seller_id: &str) -> Result<(Conversation, bool)> {
        let mut created = false;
        // The pair entry stays locked until the conversation is stored.
        let id = *self
            .by_pair
            .entry((buyer_id.to_string(), seller_id.to_string()))
            .or_insert_with(|| {
                let conversation = Conversation::new(buyer_id, seller_id);
                let id = conversation.id;
                self.by_id.insert(id, conversation);
                created = true;
                id
            });

        let conversation = self
            .by_id
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(crate::error::AppError::InternalError)?;

        Ok((conversation, created))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.by_id.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_participant(&self, participant_id: &str) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .by_id
            .iter()
            .filter(|entry| entry.has_participant(participant_id))
            .map(|entry| entry.value().clone())
            .collect();

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn record_last_message(&self, message: &Message) -> Result<()> {
        if let Some(mut conversation) = self.by_id.get_mut(&message.conversation_id) {
            if conversation
                .last_message_at
                .is_some_and(|recorded| recorded > message.created_at)
            {
                return Ok(());
            }

            conversation.last_message = Some(message.preview());
            conversation.last_message_id = Some(message.id);
            conversation.last_message_sender = Some(message.sender.clone());
            conversation.last_message_at = Some(message.created_at);
            conversation.updated_at = Utc::now();
        }

        Ok(())
    }
}
