// Re-export needed modules for testing
pub mod ai;
pub mod chat;
pub mod config;
pub mod models;
pub mod realtime;

// Re-export main types for convenience
pub use chat::{ChatError, ChatRoom, RoomSnapshot};
pub use models::*;
pub use realtime::{MemoryStore, Store, StoreError};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn message(id: &str, sender: &str, body: &str) -> ChatMessage {
        ChatMessage {
            id: id.to_string(),
            room_id: RoomId::global(),
            sender_id: sender.to_string(),
            nickname: sender.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_room_ids() {
        let global = RoomId::global();
        let pair = RoomId::pair("zed", "amy");

        assert!(global.is_global());
        assert!(!pair.is_global());
        assert_eq!(pair.as_str(), "amy_zed");
        assert_eq!(pair, RoomId::pair("amy", "zed"));
        assert_eq!(room_key("zed", "amy"), pair.to_string());
    }

    #[test]
    fn test_message_creation_and_delivery_status() {
        let msg = message("msg123", "sender1", "Hello, world!");
        let pending = LocalMessage {
            message: msg.clone(),
            status: DeliveryStatus::Pending,
        };

        assert_eq!(pending.message.id, "msg123");
        assert_eq!(pending.message.sender_id, "sender1");
        assert_eq!(pending.message.body, "Hello, world!");
        assert_eq!(pending.status, DeliveryStatus::Pending);
        assert!(!pending.message.is_system());

        let confirmed = LocalMessage {
            status: DeliveryStatus::Confirmed,
            ..pending.clone()
        };
        let rolled_back = LocalMessage {
            status: DeliveryStatus::RolledBack,
            ..pending
        };
        assert_eq!(confirmed.status, DeliveryStatus::Confirmed);
        assert_eq!(rolled_back.status, DeliveryStatus::RolledBack);
    }

    #[test]
    fn test_system_message() {
        let farewell = message("m1", SYSTEM_SENDER, "Alice left the chat");
        assert!(farewell.is_system());
    }

    #[test]
    fn test_timestamp_handling() {
        let now = Utc::now();
        let mut current = message("msg_current", "sender1", "Current timestamp message");
        current.created_at = now;
        let mut past = message("msg_past", "sender1", "Past timestamp message");
        past.created_at = now - Duration::hours(1);

        assert!(current.created_at > past.created_at);
        assert_eq!((current.created_at - past.created_at).num_seconds(), 3600);

        // Timestamps survive a trip through the row format
        let json = serde_json::to_string(&Record::Message(past.clone())).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Record::Message(past));
    }
}
