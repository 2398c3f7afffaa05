// Typing indicators
//
// Two independent mechanisms keep indicators from sticking around:
// observers prune any entry older than the timeout on every tick, and the
// typing user deletes its own row once it stops typing. Observer pruning is
// the authoritative one; the owner's delete only makes it disappear sooner.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::models::TypingEntry;

/// Typing entries of other users, as seen by one client.
#[derive(Debug, Default, Clone)]
pub struct TypingList {
    entries: Vec<TypingEntry>,
}

impl TypingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[TypingEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn upsert(&mut self, entry: TypingEntry) {
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

    /// Drop entries more than `timeout` old at `now`. Returns how many went.
    pub fn prune(&mut self, timeout: Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| !is_expired(entry, timeout, now));
        before - self.entries.len()
    }
}

/// An entry is expired once it is strictly older than `timeout`.
pub fn is_expired(entry: &TypingEntry, timeout: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(timeout) {
        Ok(timeout) => now - entry.typed_at > timeout,
        Err(_) => false,
    }
}

/// What the owner has to do with its own typing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingAction {
    /// Write (or refresh) the typing row
    Upsert,
    /// Remove the typing row
    Delete,
    Nothing,
}

/// The local user's typing state: a debounced inactivity deadline on a
/// monotonic clock.
#[derive(Debug, Clone)]
pub struct TypingTimer {
    timeout: Duration,
    refresh: Duration,
    deadline: Option<Instant>,
    last_write: Option<Instant>,
}

impl TypingTimer {
    pub fn new(timeout: Duration, refresh: Duration) -> Self {
        Self {
            timeout,
            refresh,
            deadline: None,
            last_write: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the current burst goes idle, if one is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A keystroke at `now`. Repeated keystrokes push the deadline out; the row
    /// is rewritten at most once per refresh interval.
    pub fn keystroke(&mut self, now: Instant) -> TypingAction {
        let was_typing = self.is_typing();
        self.deadline = Some(now + self.timeout);

        let refresh_due = self
            .last_write
            .map_or(true, |last| now.duration_since(last) >= self.refresh);
        if !was_typing || refresh_due {
            self.last_write = Some(now);
            TypingAction::Upsert
        } else {
            TypingAction::Nothing
        }
    }

    /// Explicit stop (message sent, input cleared).
    pub fn stop(&mut self) -> TypingAction {
        if self.deadline.take().is_some() {
            self.last_write = None;
            TypingAction::Delete
        } else {
            TypingAction::Nothing
        }
    }

    /// Expire the deadline if it has passed.
    pub fn poll(&mut self, now: Instant) -> TypingAction {
        match self.deadline {
            Some(deadline) if now >= deadline => self.stop(),
            _ => TypingAction::Nothing,
        }
    }

    /// Undo a keystroke whose row write failed.
    pub fn reset(&mut self) {
        self.deadline = None;
        self.last_write = None;
    }
}
