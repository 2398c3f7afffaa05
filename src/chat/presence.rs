use crate::models::PresenceEntry;

/// Who is online in a room, one entry per user.
#[derive(Debug, Default, Clone)]
pub struct OnlineList {
    entries: Vec<PresenceEntry>,
}

impl OnlineList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[PresenceEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.user_id == user_id)
    }

    /// Insert or overwrite by user id. Last write wins.
    pub fn upsert(&mut self, entry: PresenceEntry) {
        match self.entries.iter_mut().find(|existing| existing.user_id == entry.user_id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn remove(&mut self, user_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.user_id != user_id);
        before != self.entries.len()
    }
}
