// Declare submodules
pub mod conversation_dto;
pub mod conversation_handlers;
pub mod conversation_models;
pub mod conversation_repository;

// Re-export public items
pub use conversation_models::Conversation;
pub use conversation_repository::ConversationDirectory;
