use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceChange {
    pub participant: String,
    pub online: bool,
}

/// Tracks which participants have at least one open WebSocket session.
#[derive(Clone)]
pub struct PresenceRegistry {
    sessions: Arc<DashMap<String, usize>>,
    changes: broadcast::Sender<PresenceChange>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(100);
        Self {
            sessions: Arc::new(DashMap::new()),
            changes,
        }
    }

    /// Registers a session. Returns `true` when the participant just came online.
    ///
    /// Transitions are announced while the participant's entry is locked, so
    /// subscribers see them in the order they happened.
    pub fn connect(&self, participant: &str) -> bool {
        let mut count = self.sessions.entry(participant.to_string()).or_insert(0);
        *count += 1;
        let came_online = *count == 1;

        if came_online {
            tracing::info!("Participant {} connected via WebSocket", participant);
            self.announce(participant, true);
        }
        came_online
    }

    /// Unregisters a session. Returns `true` when the last session closed.
    pub fn disconnect(&self, participant: &str) -> bool {
        let removed = self.sessions.remove_if_mut(participant, |_, count| {
            *count = count.saturating_sub(1);
            if *count > 0 {
                return false;
            }
            tracing::info!("Participant {} disconnected from WebSocket", participant);
            self.announce(participant, false);
            true
        });
        removed.is_some()
    }

    pub fn is_online(&self, participant: &str) -> bool {
        self.sessions.contains_key(participant)
    }

    /// Online participants, sorted.
    pub fn online_participants(&self) -> Vec<String> {
        let mut online: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        online.sort();
        online
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.changes.subscribe()
    }

    fn announce(&self, participant: &str, online: bool) {
        let _ = self.changes.send(PresenceChange {
            participant: participant.to_string(),
            online,
        });
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
