use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{connection::PresenceChange, hub::ChatEvent};
use crate::message::{ImageRef, Message};

// Server-to-client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Joined {
        conversation_id: Uuid,
    },
    Left {
        conversation_id: Uuid,
    },
    MessageCreated {
        message: Message,
    },
    MessageSeen {
        message_id: Uuid,
        conversation_id: Uuid,
    },
    Presence {
        participant: String,
        online: bool,
    },
    Error {
        message: String,
    },
}

impl From<ChatEvent> for ServerMessage {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::MessageCreated { message } => ServerMessage::MessageCreated { message },
            ChatEvent::MessageSeen {
                message_id,
                conversation_id,
            } => ServerMessage::MessageSeen {
                message_id,
                conversation_id,
            },
        }
    }
}

impl From<PresenceChange> for ServerMessage {
    fn from(change: PresenceChange) -> Self {
        ServerMessage::Presence {
            participant: change.participant,
            online: change.online,
        }
    }
}

// Client-to-server messages
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        conversation_id: Uuid,
    },
    Leave {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        text: Option<String>,
        image: Option<ImageRef>,
    },
    MarkSeen {
        message_id: Uuid,
    },
}
