pub mod connection;
pub mod handler;
pub mod hub;
pub mod types;

pub use connection::PresenceRegistry;
pub use handler::{participant_presence, presence, ws_handler};
pub use hub::{ChatEvent, DeliveryHub};
