// Per-room realtime subscription lifecycle
// unsubscribed -> subscribing -> subscribed -> unsubscribed

use std::sync::Arc;

use log::{debug, info};

use crate::models::RoomId;
use crate::realtime::{ChangeEvent, Filter, Store, StoreError, Subscription, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribing,
    Subscribed,
}

/// The three table subscriptions backing one room view.
///
/// Messages are filtered by room on the backend; presence and typing arrive
/// for every room and the view-model filters them itself. Dropping the feed
/// releases every handle.
pub struct RoomFeed<S: Store> {
    store: Arc<S>,
    room_id: RoomId,
    state: SubscriptionState,
    subscriptions: Vec<Subscription>,
}

impl<S: Store> RoomFeed<S> {
    pub fn new(store: Arc<S>, room_id: RoomId) -> Self {
        Self {
            store,
            room_id,
            state: SubscriptionState::Unsubscribed,
            subscriptions: Vec::new(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Subscribe to all three tables. On failure every handle acquired so far
    /// is released and the feed is back to `Unsubscribed`.
    pub async fn open(&mut self) -> Result<(), StoreError> {
        if self.state != SubscriptionState::Unsubscribed {
            return Ok(());
        }
        self.state = SubscriptionState::Subscribing;
        debug!("Subscribing to room {}", self.room_id);

        let wanted = [
            (Table::Messages, Filter::all().eq("room_id", self.room_id.to_string())),
            (Table::Presence, Filter::all()),
            (Table::Typing, Filter::all()),
        ];

        for (table, filter) in wanted {
            match self.store.subscribe(table, filter).await {
                Ok(subscription) => self.subscriptions.push(subscription),
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }

        self.state = SubscriptionState::Subscribed;
        info!("Subscribed to room {}", self.room_id);
        Ok(())
    }

    /// Release every handle. Idempotent.
    pub fn close(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            self.store.unsubscribe(subscription.id);
        }
        if self.state != SubscriptionState::Unsubscribed {
            debug!("Unsubscribed from room {}", self.room_id);
        }
        self.state = SubscriptionState::Unsubscribed;
    }

    /// Next event from any of the tables. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        let mut subscriptions = self.subscriptions.iter_mut();
        let (Some(messages), Some(presence), Some(typing)) =
            (subscriptions.next(), subscriptions.next(), subscriptions.next())
        else {
            return None;
        };

        tokio::select! {
            Some(event) = messages.events.recv() => Some(event),
            Some(event) = presence.events.recv() => Some(event),
            Some(event) = typing.events.recv() => Some(event),
            else => None,
        }
    }

    /// Next already-queued event, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.subscriptions
            .iter_mut()
            .find_map(|subscription| subscription.events.try_recv().ok())
    }
}

impl<S: Store> Drop for RoomFeed<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::MemoryStore;

    #[tokio::test]
    async fn test_open_and_close() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = RoomFeed::new(store.clone(), RoomId::global());
        assert_eq!(feed.state(), SubscriptionState::Unsubscribed);

        feed.open().await.unwrap();
        assert_eq!(feed.state(), SubscriptionState::Subscribed);
        assert_eq!(store.subscriber_count(), 3);

        // Opening twice does not double-subscribe
        feed.open().await.unwrap();
        assert_eq!(store.subscriber_count(), 3);

        feed.close();
        assert_eq!(feed.state(), SubscriptionState::Unsubscribed);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_drop_releases_subscriptions() {
        let store = Arc::new(MemoryStore::new());
        {
            let mut feed = RoomFeed::new(store.clone(), RoomId::pair("a", "b"));
            feed.open().await.unwrap();
            assert_eq!(store.subscriber_count(), 3);
        }
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_without_subscriptions() {
        let store = Arc::new(MemoryStore::new());
        let mut feed = RoomFeed::new(store, RoomId::global());
        assert!(feed.recv().await.is_none());
        assert!(feed.try_recv().is_none());
    }
}
