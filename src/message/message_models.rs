use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Reference to an image already uploaded to the media host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImageRef {
    pub public_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: String,
    pub text: Option<String>,
    pub image: Option<ImageRef>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Short form shown in conversation listings.
    pub fn preview(&self) -> String {
        self.text.clone().unwrap_or_else(|| "Photo".to_string())
    }
}

/// A message that passed validation and is ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender: String,
    pub text: Option<String>,
    pub image: Option<ImageRef>,
}

impl NewMessage {
    pub fn into_message(self, now: DateTime<Utc>) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: self.conversation_id,
            sender: self.sender,
            text: self.text,
            image: self.image,
            seen: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Flat row layout of the `messages` table.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: String,
    pub text: Option<String>,
    pub image_public_id: Option<String>,
    pub image_url: Option<String>,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let image = match (row.image_public_id, row.image_url) {
            (Some(public_id), Some(url)) => Some(ImageRef { public_id, url }),
            _ => None,
        };

        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender: row.sender,
            text: row.text,
            image,
            seen: row.seen,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
