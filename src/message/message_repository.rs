use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::PgPool;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use uuid::Uuid;

use super::message_models::{Message, MessageRow, NewMessage};
use crate::error::{AppError, Result};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender, text, image_public_id, image_url, \
                               seen, created_at, updated_at";

/// Append-only message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, message: NewMessage) -> Result<Message>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Message>>;

    /// Sets `seen`. Returns `None` for an unknown id, otherwise the message
    /// and whether this call performed the false -> true flip.
    async fn mark_seen(&self, id: Uuid) -> Result<Option<(Message, bool)>>;

    /// Lazily yields a conversation's messages, oldest first.
    fn stream_by_conversation(&self, conversation_id: Uuid) -> BoxStream<'_, Result<Message>>;
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let (image_public_id, image_url) = match message.image {
            Some(image) => (Some(image.public_id), Some(image.url)),
            None => (None, None),
        };

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (conversation_id, sender, text, image_public_id, image_url)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(message.conversation_id)
        .bind(&message.sender)
        .bind(message.text.as_deref())
        .bind(image_public_id)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Message::from))
    }

    async fn mark_seen(&self, id: Uuid) -> Result<Option<(Message, bool)>> {
        let flipped = sqlx::query_as::<_, MessageRow>(&format!(
            "UPDATE messages
             SET seen = true, updated_at = NOW()
             WHERE id = $1 AND seen = false
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = flipped {
            return Ok(Some((row.into(), true)));
        }

        Ok(self.find_by_id(id).await?.map(|message| (message, false)))
    }

    fn stream_by_conversation(&self, conversation_id: Uuid) -> BoxStream<'_, Result<Message>> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id, conversation_id, sender, text, image_public_id, image_url,
                    seen, created_at, updated_at
             FROM messages
             WHERE conversation_id = $1
             ORDER BY created_at ASC, seq ASC",
        )
        .bind(conversation_id)
        .fetch(&self.pool)
        .map(|row| row.map(Message::from).map_err(AppError::from))
        .boxed()
    }
}

#[derive(Default)]
struct MessageLog {
    messages: Vec<Message>,
    positions: HashMap<Uuid, usize>,
}

/// Process-local store used when no database is configured, and in tests.
/// Insertion order is creation order.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    log: Arc<RwLock<MessageLog>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next message of the conversation at or after `from`, with the index after it.
    fn next_in_conversation(
        &self,
        conversation_id: Uuid,
        from: usize,
    ) -> Result<Option<(Message, usize)>> {
        let log = self.log.read().map_err(|_| AppError::InternalError)?;

        Ok(log
            .messages
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, message)| message.conversation_id == conversation_id)
            .map(|(index, message)| (message.clone(), index + 1)))
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert(&self, message: NewMessage) -> Result<Message> {
        let mut log = self.log.write().map_err(|_| AppError::InternalError)?;

        // Stamped under the write lock so timestamps never run backwards in the log.
        let message = message.into_message(Utc::now());
        let position = log.messages.len();
        log.positions.insert(message.id, position);
        log.messages.push(message.clone());

        Ok(message)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        let log = self.log.read().map_err(|_| AppError::InternalError)?;

        Ok(log
            .positions
            .get(&id)
            .and_then(|&position| log.messages.get(position))
            .cloned())
    }

    async fn mark_seen(&self, id: Uuid) -> Result<Option<(Message, bool)>> {
        let mut log = self.log.write().map_err(|_| AppError::InternalError)?;

        let Some(position) = log.positions.get(&id).copied() else {
            return Ok(None);
        };
        let Some(message) = log.messages.get_mut(position) else {
            return Ok(None);
        };

        let flipped = !message.seen;
        if flipped {
            message.seen = true;
            message.updated_at = Utc::now();
        }

        Ok(Some((message.clone(), flipped)))
    }

    fn stream_by_conversation(&self, conversation_id: Uuid) -> BoxStream<'_, Result<Message>> {
        stream::unfold(Some(0usize), move |cursor| async move {
            let Some(from) = cursor else {
                return None;
            };
            match self.next_in_conversation(conversation_id, from) {
                Ok(Some((message, next))) => Some((Ok(message), Some(next))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed()
    }
}
