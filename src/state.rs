use anyhow::Context;
use std::sync::Arc;

use crate::{
    conversation::conversation_repository::{
        ConversationDirectory, InMemoryConversationDirectory, PgConversationDirectory,
    },
    db::DbPool,
    message::{
        message_repository::{InMemoryMessageStore, MessageStore, PgMessageStore},
        MessageService,
    },
    websocket::{DeliveryHub, PresenceRegistry},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub conversations: Arc<dyn ConversationDirectory>,
    pub message_service: MessageService,
    pub hub: DeliveryHub,
    pub presence: PresenceRegistry,
}

impl AppState {
    /// Wires the stores, hub and service together. Everything a handler
    /// touches hangs off this value; nothing is registered globally.
    pub fn new(
        config: Arc<Config>,
        conversations: Arc<dyn ConversationDirectory>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let hub = DeliveryHub::new(config.delivery_channel_capacity);
        let message_service = MessageService::new(messages, conversations.clone(), hub.clone());

        Self {
            config,
            conversations,
            message_service,
            hub,
            presence: PresenceRegistry::new(),
        }
    }

    pub fn postgres(config: Arc<Config>, db: DbPool) -> Self {
        let conversations = Arc::new(PgConversationDirectory::new(db.clone()));
        let messages = Arc::new(PgMessageStore::new(db));
        Self::new(config, conversations, messages)
    }

    pub fn in_memory(config: Arc<Config>) -> Self {
        let conversations = Arc::new(InMemoryConversationDirectory::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        Self::new(config, conversations, messages)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub request_timeout_secs: u64,
    pub delivery_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            database_url: None,
            database_max_connections: 5,
            request_timeout_secs: 30,
            delivery_channel_capacity: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            database_max_connections: parse_or(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            request_timeout_secs: parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            )?,
            delivery_channel_capacity: parse_or(
                &lookup,
                "DELIVERY_CHANNEL_CAPACITY",
                defaults.delivery_channel_capacity,
            )?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", key, raw)),
        None => Ok(default),
    }
}
