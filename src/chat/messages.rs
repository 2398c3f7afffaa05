// Local message list
// Optimistic sends go through Pending and end either Confirmed or RolledBack.

use std::time::Duration;

use log::debug;

use crate::models::{ChatMessage, DeliveryStatus, LocalMessage};

#[derive(Debug, Default, Clone)]
pub struct MessageList {
    entries: Vec<LocalMessage>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LocalMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: &str) -> Option<&LocalMessage> {
        self.entries.iter().find(|entry| entry.message.id == id)
    }

    /// Show a message before the store has accepted it.
    pub fn push_pending(&mut self, message: ChatMessage) {
        self.entries.push(LocalMessage {
            message,
            status: DeliveryStatus::Pending,
        });
    }

    /// Pending → Confirmed. The stored row replaces the optimistic one, so the
    /// server-assigned id takes over from the local id.
    pub fn confirm(&mut self, local_id: &str, stored: ChatMessage) -> bool {
        let Some(index) = self.position(local_id) else {
            return false;
        };

        // The feed may already have delivered the stored row under its server id
        if stored.id != local_id && self.get(&stored.id).is_some() {
            debug!("Message {} already delivered by the feed, dropping the optimistic copy", stored.id);
            self.entries.remove(index);
            return true;
        }

        self.entries[index] = LocalMessage {
            message: stored,
            status: DeliveryStatus::Confirmed,
        };
        true
    }

    /// Pending → RolledBack. The entry leaves the list and is handed back.
    pub fn rollback(&mut self, local_id: &str) -> Option<LocalMessage> {
        let index = self.position(local_id)?;
        let mut entry = self.entries.remove(index);
        entry.status = DeliveryStatus::RolledBack;
        Some(entry)
    }

    /// Whether `incoming` collapses onto a message already in the list: same id,
    /// or same sender and body created less than `window` apart.
    pub fn is_duplicate(&self, incoming: &ChatMessage, window: Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        self.entries.iter().any(|entry| {
            let local = &entry.message;
            local.id == incoming.id
                || (local.sender_id == incoming.sender_id
                    && local.body == incoming.body
                    && (local.created_at - incoming.created_at).abs() < window)
        })
    }

    /// Append a message delivered by the feed unless it is a duplicate.
    pub fn apply_remote_insert(&mut self, message: ChatMessage, window: Duration) -> bool {
        if self.is_duplicate(&message, window) {
            debug!("Dropping duplicate message {} from {}", message.id, message.sender_id);
            return false;
        }
        self.entries.push(LocalMessage {
            message,
            status: DeliveryStatus::Confirmed,
        });
        true
    }

    /// Remove by id. Absent ids are not an error.
    pub fn remove(&mut self, id: &str) -> Option<(usize, LocalMessage)> {
        let index = self.position(id)?;
        Some((index, self.entries.remove(index)))
    }

    /// Put a removed entry back where it was.
    pub fn restore(&mut self, index: usize, entry: LocalMessage) {
        let index = index.min(self.entries.len());
        self.entries.insert(index, entry);
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.message.id == id)
    }
}
