use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct OpenConversationRequest {
    #[validate(length(min = 1, max = 255))]
    pub buyer_id: String,
    #[validate(length(min = 1, max = 255))]
    pub seller_id: String,
}

impl OpenConversationRequest {
    /// Checks the pair and returns trimmed ids.
    pub fn participants(&self) -> Result<(&str, &str)> {
        self.validate()?;

        let buyer_id = self.buyer_id.trim();
        let seller_id = self.seller_id.trim();

        if buyer_id.is_empty() || seller_id.is_empty() {
            return Err(AppError::Validation(
                "buyer_id and seller_id must not be blank".to_string(),
            ));
        }
        if buyer_id == seller_id {
            return Err(AppError::Validation(
                "a conversation needs two different participants".to_string(),
            ));
        }

        Ok((buyer_id, seller_id))
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationListResponse {
    pub participant_id: String,
    pub conversations: Vec<super::Conversation>,
}
