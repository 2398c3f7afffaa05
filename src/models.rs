use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Room identifier of the shared chat everybody lands in.
pub const GLOBAL_ROOM: &str = "global";

/// Separator placed between the two sorted participant ids of a pair room.
pub const PAIR_SEPARATOR: char = '_';

/// Sender id used for messages the app writes on a user's behalf.
pub const SYSTEM_SENDER: &str = "system";

/// Scope of a chat: the global room or a two-party room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn global() -> Self {
        RoomId(GLOBAL_ROOM.to_string())
    }

    /// Two-party room; both participants compute the same id.
    pub fn pair(a: &str, b: &str) -> Self {
        RoomId(room_key(a, b))
    }

    pub fn is_global(&self) -> bool {
        self.0 == GLOBAL_ROOM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        RoomId(value.to_string())
    }
}

/// Order-independent key for the room shared by `a` and `b`.
pub fn room_key(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{first}{PAIR_SEPARATOR}{second}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: String,
    pub nickname: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: String,
    pub room_id: RoomId,
    pub nickname: String,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingEntry {
    pub user_id: String,
    pub room_id: RoomId,
    pub nickname: String,
    pub typed_at: DateTime<Utc>,
}

/// Where a locally displayed message is in its send lifecycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeliveryStatus {
    Pending,    // Shown optimistically, store write in flight
    Confirmed,  // Accepted by the store (or received from the feed)
    RolledBack, // Store rejected it; no longer displayed
}

/// A message as held by a view-model.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    pub message: ChatMessage,
    pub status: DeliveryStatus,
}

/// One row of any of the three chat tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum Record {
    Message(ChatMessage),
    Presence(PresenceEntry),
    Typing(TypingEntry),
}

impl Record {
    /// Column value as text, for filtering and ordering.
    pub fn field(&self, column: &str) -> Option<String> {
        let stamp = |t: &DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Micros, true);
        match self {
            Record::Message(m) => match column {
                "id" => Some(m.id.clone()),
                "room_id" => Some(m.room_id.to_string()),
                "sender_id" => Some(m.sender_id.clone()),
                "nickname" => Some(m.nickname.clone()),
                "body" => Some(m.body.clone()),
                "created_at" => Some(stamp(&m.created_at)),
                _ => None,
            },
            Record::Presence(p) => match column {
                "user_id" => Some(p.user_id.clone()),
                "room_id" => Some(p.room_id.to_string()),
                "nickname" => Some(p.nickname.clone()),
                "last_seen" => Some(stamp(&p.last_seen)),
                _ => None,
            },
            Record::Typing(t) => match column {
                "user_id" => Some(t.user_id.clone()),
                "room_id" => Some(t.room_id.to_string()),
                "nickname" => Some(t.nickname.clone()),
                "typed_at" => Some(stamp(&t.typed_at)),
                _ => None,
            },
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Record::Message(m) => &m.room_id,
            Record::Presence(p) => &p.room_id,
            Record::Typing(t) => &t.room_id,
        }
    }
}

/// Random "Adjective Noun" nickname for users who did not pick one.
pub fn random_nickname() -> String {
    let adjectives = [
        "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Shy",
        "Clever", "Gentle", "Calm", "Bold", "Happy", "Eager", "Golden", "Lucky",
    ];
    let nouns = [
        "Fox", "Bear", "Owl", "Rabbit", "Panda", "Kitten", "Puppy", "Turtle",
        "Dolphin", "Whale", "Otter", "Penguin", "Hamster", "Sparrow",
    ];

    let mut rng = rand::thread_rng();
    format!(
        "{} {}",
        adjectives.choose(&mut rng).copied().unwrap_or("Quiet"),
        nouns.choose(&mut rng).copied().unwrap_or("Guest"),
    )
}
