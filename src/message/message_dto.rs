use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::message_models::{ImageRef, NewMessage};
use crate::error::{AppError, Result};

/// Body of `POST /api/messages`. Required fields are optional here so a
/// missing field is reported as a validation error, not a decode failure.
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct SendMessageRequest {
    #[validate(required)]
    pub conversation_id: Option<Uuid>,
    #[validate(required, length(min = 1, max = 255))]
    pub sender: Option<String>,
    pub text: Option<String>,
    pub image: Option<ImageRef>,
}

impl SendMessageRequest {
    pub fn into_new_message(self) -> Result<NewMessage> {
        self.validate()?;

        let (Some(conversation_id), Some(sender)) = (self.conversation_id, self.sender) else {
            return Err(AppError::Validation(
                "conversation_id and sender are required".to_string(),
            ));
        };

        let sender = sender.trim().to_string();
        if sender.is_empty() {
            return Err(AppError::Validation("sender must not be blank".to_string()));
        }

        if let Some(image) = &self.image {
            if image.public_id.trim().is_empty() || image.url.trim().is_empty() {
                return Err(AppError::Validation(
                    "image needs both public_id and url".to_string(),
                ));
            }
        }

        let text = self.text.filter(|text| !text.trim().is_empty());
        if text.is_none() && self.image.is_none() {
            return Err(AppError::Validation(
                "a message needs text or an image".to_string(),
            ));
        }

        Ok(NewMessage {
            conversation_id,
            sender,
            text,
            image: self.image,
        })
    }
}
