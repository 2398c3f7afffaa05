// Backend collaborator contract
// Row storage plus a realtime change feed, consumed as an opaque service.
// The chat view-model only talks to the backend through the `Store` trait.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::Record;

pub mod janitor;
pub mod memory;

pub use memory::MemoryStore;

/// Tables consumed by the chat core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Messages,
    Presence,
    Typing,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Messages => "chat_messages",
            Table::Presence => "chat_presence",
            Table::Typing => "chat_typing",
        }
    }

    /// Whether `record` is a row of this table.
    pub fn holds(&self, record: &Record) -> bool {
        matches!(
            (self, record),
            (Table::Messages, Record::Message(_))
                | (Table::Presence, Record::Presence(_))
                | (Table::Typing, Record::Typing(_))
        )
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Conjunction of `column = value` clauses. Empty matches every row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, String)>,
}

impl Filter {
    pub fn all() -> Self {
        Filter::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<String>) -> Self {
        self.clauses.push((column.to_string(), value.into()));
        self
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.clauses
            .iter()
            .all(|(column, value)| record.field(column).as_deref() == Some(value.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &'static str) -> Self {
        Order { column, ascending: true }
    }

    pub fn desc(column: &'static str) -> Self {
        Order { column, ascending: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change pushed by the realtime feed.
///
/// `new` is set for inserts and updates, `old` for updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Record>,
    pub old: Option<Record>,
}

impl ChangeEvent {
    /// The row the event is about: `new` when present, otherwise `old`.
    pub fn record(&self) -> Option<&Record> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Acknowledged subscription. Dropping the receiver is not enough to stop the
/// backend from tracking it; call `Store::unsubscribe`.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub table: Table,
    pub events: mpsc::Receiver<ChangeEvent>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Row does not belong to table {0}")]
    TableMismatch(Table),

    #[error("Conflict key column {0} is missing from the row")]
    MissingConflictColumn(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// The operations the chat core needs from its hosted backend.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn insert(&self, table: Table, row: Record) -> Result<Record, StoreError>;

    /// Insert, or overwrite the row whose `conflict_key` columns match. Last write wins.
    async fn upsert(&self, table: Table, row: Record, conflict_key: &[&str]) -> Result<Record, StoreError>;

    /// Returns the number of rows removed.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError>;

    async fn select(&self, table: Table, filter: &Filter, order: Option<Order>) -> Result<Vec<Record>, StoreError>;

    /// Resolves once the backend acknowledged the subscription.
    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError>;

    fn unsubscribe(&self, id: SubscriptionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, PresenceEntry, RoomId};
    use chrono::Utc;

    fn message(room: &str, sender: &str) -> Record {
        Record::Message(ChatMessage {
            id: "m1".to_string(),
            room_id: RoomId::from(room),
            sender_id: sender.to_string(),
            nickname: sender.to_string(),
            body: "hello".to_string(),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_filter_matching() {
        let row = message("global", "alice");

        assert!(Filter::all().matches(&row));
        assert!(Filter::all().eq("room_id", "global").matches(&row));
        assert!(Filter::all().eq("room_id", "global").eq("sender_id", "alice").matches(&row));
        assert!(!Filter::all().eq("room_id", "global").eq("sender_id", "bob").matches(&row));
        // Unknown columns never match
        assert!(!Filter::all().eq("user_id", "alice").matches(&row));
    }

    #[test]
    fn test_table_holds() {
        let row = message("global", "alice");
        assert!(Table::Messages.holds(&row));
        assert!(!Table::Presence.holds(&row));

        let presence = Record::Presence(PresenceEntry {
            user_id: "alice".to_string(),
            room_id: RoomId::global(),
            nickname: "Alice".to_string(),
            last_seen: Utc::now(),
        });
        assert!(Table::Presence.holds(&presence));
        assert!(!Table::Typing.holds(&presence));
    }

    #[test]
    fn test_change_event_record() {
        let row = message("global", "alice");
        let deleted = ChangeEvent {
            table: Table::Messages,
            kind: ChangeKind::Delete,
            new: None,
            old: Some(row.clone()),
        };
        assert_eq!(deleted.record(), Some(&row));
    }
}
