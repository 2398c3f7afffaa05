// Common test utilities for integration tests
// This module contains shared code for all integration tests
#![allow(dead_code)]

// Standard library imports
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

// External crate imports
use async_trait::async_trait;
use log::{debug, LevelFilter};

// Import the crate functionality
use daldal::ai::{AiError, Completion, Introduction, Prompt};
use daldal::chat::ChatRoom;
use daldal::config::ChatConfig;
use daldal::models::{Record, RoomId};
use daldal::realtime::{Filter, MemoryStore, Order, Store, StoreError, Subscription, SubscriptionId, Table};

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// `MemoryStore` with switchable failures and a count of write calls.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_insert: AtomicBool,
    pub fail_upsert: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_subscribe: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// insert + upsert + delete calls so far, failed ones included
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: Table) -> Vec<Record> {
        self.inner.rows(table)
    }

    fn check(&self, flag: &AtomicBool, what: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            debug!("Injected {} failure", what);
            return Err(StoreError::Unavailable(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert(&self, table: Table, row: Record) -> Result<Record, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_insert, "insert")?;
        self.inner.insert(table, row).await
    }

    async fn upsert(&self, table: Table, row: Record, conflict_key: &[&str]) -> Result<Record, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_upsert, "upsert")?;
        self.inner.upsert(table, row, conflict_key).await
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.check(&self.fail_delete, "delete")?;
        self.inner.delete(table, filter).await
    }

    async fn select(&self, table: Table, filter: &Filter, order: Option<Order>) -> Result<Vec<Record>, StoreError> {
        self.inner.select(table, filter, order).await
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError> {
        self.check(&self.fail_subscribe, "subscribe")?;
        self.inner.subscribe(table, filter).await
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.unsubscribe(id)
    }
}

/// Join `user` to `room_id` under a nickname equal to its id.
pub async fn joined_room<S: Store>(store: &Arc<S>, room_id: RoomId, user: &str) -> ChatRoom<S> {
    let mut room = ChatRoom::new(store.clone(), room_id, user, ChatConfig::default());
    room.join(user).await.expect("join should succeed");
    room
}

/// Language model fake answering from a script, one reply per call.
pub struct ScriptedCompletion {
    replies: Mutex<Vec<Result<String, String>>>,
    calls: AtomicUsize,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedCompletion {
    /// Always answers `reply`.
    pub fn replying(reply: &str) -> Self {
        Self::script(vec![Ok(reply.to_string())])
    }

    /// Always fails with a request error.
    pub fn failing(reason: &str) -> Self {
        Self::script(vec![Err(reason.to_string())])
    }

    /// Replies in order; the last one repeats.
    pub fn script(replies: Vec<Result<String, String>>) -> Self {
        ScriptedCompletion {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completion for ScriptedCompletion {
    async fn complete(&self, prompt: &Prompt) -> Result<String, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());

        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies.first().cloned().unwrap_or_else(|| Err("script is empty".to_string()))
        };
        reply.map_err(AiError::Request)
    }
}

pub fn introduction(user_id: &str, nickname: &str, bio: &str) -> Introduction {
    Introduction {
        user_id: user_id.to_string(),
        nickname: nickname.to_string(),
        bio: bio.to_string(),
        interests: Vec::new(),
        ideal_type: None,
    }
}
