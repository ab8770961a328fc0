use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::message::Message;

/// Something that happened in a conversation and is pushed to live sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated {
        message: Message,
    },
    MessageSeen {
        message_id: Uuid,
        conversation_id: Uuid,
    },
}

impl ChatEvent {
    pub fn conversation_id(&self) -> Uuid {
        match self {
            ChatEvent::MessageCreated { message } => message.conversation_id,
            ChatEvent::MessageSeen {
                conversation_id, ..
            } => *conversation_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::MessageCreated { .. } => "message_created",
            ChatEvent::MessageSeen { .. } => "message_seen",
        }
    }
}

/// One broadcast channel per conversation, created on first subscribe.
///
/// Publishing never waits: with no subscribers the event is dropped, and a
/// subscriber that falls more than `capacity` events behind skips ahead.
#[derive(Clone)]
pub struct DeliveryHub {
    channels: Arc<DashMap<Uuid, broadcast::Sender<ChatEvent>>>,
    capacity: usize,
}

impl DeliveryHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, conversation_id: Uuid) -> broadcast::Receiver<ChatEvent> {
        self.channels
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, event: ChatEvent) -> usize {
        let conversation_id = event.conversation_id();
        let kind = event.kind();

        let delivered = match self.channels.get(&conversation_id) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            self.prune(conversation_id);
        }

        tracing::debug!(%conversation_id, kind, delivered, "published chat event");
        delivered
    }

    /// Drops the conversation's channel once nobody listens to it.
    pub fn prune(&self, conversation_id: Uuid) {
        self.channels
            .remove_if(&conversation_id, |_, sender| sender.receiver_count() == 0);
    }

    /// Drops every channel nobody listens to. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before.saturating_sub(self.channels.len())
    }

    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.channels
            .get(&conversation_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
