use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A chat channel between exactly one buyer and one seller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Conversation {
    pub id: Uuid,
    pub buyer_id: String,
    pub seller_id: String,
    pub last_message: Option<String>,
    pub last_message_id: Option<Uuid>,
    pub last_message_sender: Option<String>,
    /// `created_at` of the message the metadata describes.
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(buyer_id: &str, seller_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buyer_id: buyer_id.to_string(),
            seller_id: seller_id.to_string(),
            last_message: None,
            last_message_id: None,
            last_message_sender: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.buyer_id == participant_id || self.seller_id == participant_id
    }
}
