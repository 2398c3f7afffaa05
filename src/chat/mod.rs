// Chat view-model
// Owns the client-local projection of one room: messages, who is online and
// who is typing. Local state is updated optimistically, written to the store,
// and reconciled against what the realtime feed sends back.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ChatConfig;
use crate::models::{
    ChatMessage, LocalMessage, PresenceEntry, Record, RoomId, TypingEntry, SYSTEM_SENDER,
};
use crate::realtime::{ChangeEvent, ChangeKind, Filter, Order, Store, StoreError, Table};

pub mod driver;
pub mod feed;
pub mod messages;
pub mod presence;
pub mod typing;

pub use feed::{RoomFeed, SubscriptionState};
pub use messages::MessageList;
pub use presence::OnlineList;
pub use typing::{TypingAction, TypingList, TypingTimer};

/// Presence and typing rows are unique per (user, room).
const MEMBER_KEY: &[&str] = &["user_id", "room_id"];

/// Input rejected before any store call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Message is {len} characters long, the limit is {max}")]
    MessageTooLong { len: usize, max: usize },

    #[error("Nickname is empty")]
    EmptyNickname,

    #[error("Nickname is {len} characters long, the limit is {max}")]
    NicknameTooLong { len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not joined to room {0}")]
    NotJoined(RoomId),

    #[error("Only the sender may delete message {0}")]
    NotAuthor(String),

    #[error("Message {0} not found")]
    UnknownMessage(String),

    /// The optimistic message was removed again; it is carried here so the
    /// caller can offer to resend it.
    #[error("Failed to send message: {source}")]
    SendFailed {
        message: Box<LocalMessage>,
        #[source]
        source: StoreError,
    },

    #[error("Backend error: {0}")]
    Store(#[from] StoreError),
}

/// Immutable copy of what the room currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub joined: bool,
    pub messages: Vec<LocalMessage>,
    pub online: Vec<PresenceEntry>,
    pub typing: Vec<TypingEntry>,
}

pub struct ChatRoom<S: Store> {
    store: Arc<S>,
    config: ChatConfig,
    room_id: RoomId,
    user_id: String,
    nickname: String,
    joined: bool,
    feed: RoomFeed<S>,
    messages: MessageList,
    online: OnlineList,
    typing: TypingList,
    typing_timer: TypingTimer,
    last_heartbeat: Option<Instant>,
}

impl<S: Store> ChatRoom<S> {
    pub fn new(store: Arc<S>, room_id: RoomId, user_id: &str, config: ChatConfig) -> Self {
        let typing_timer = TypingTimer::new(config.typing_timeout(), config.typing_refresh());
        Self {
            feed: RoomFeed::new(store.clone(), room_id.clone()),
            store,
            config,
            room_id,
            user_id: user_id.to_string(),
            nickname: String::new(),
            joined: false,
            messages: MessageList::new(),
            online: OnlineList::new(),
            typing: TypingList::new(),
            typing_timer,
            last_heartbeat: None,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    pub fn is_typing(&self) -> bool {
        self.typing_timer.is_typing()
    }

    pub fn typing_deadline(&self) -> Option<Instant> {
        self.typing_timer.deadline()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.feed.state()
    }

    pub fn messages(&self) -> &[LocalMessage] {
        self.messages.entries()
    }

    pub fn online(&self) -> &[PresenceEntry] {
        self.online.entries()
    }

    pub fn typing(&self) -> &[TypingEntry] {
        self.typing.entries()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            joined: self.joined,
            messages: self.messages.entries().to_vec(),
            online: self.online.entries().to_vec(),
            typing: self.typing.entries().to_vec(),
        }
    }

    fn validate_nickname(&self, nickname: &str) -> Result<String, ValidationError> {
        let nickname = nickname.trim();
        if nickname.is_empty() {
            return Err(ValidationError::EmptyNickname);
        }
        let len = nickname.chars().count();
        if len > self.config.max_nickname_len {
            return Err(ValidationError::NicknameTooLong { len, max: self.config.max_nickname_len });
        }
        Ok(nickname.to_string())
    }

    fn validate_body(&self, text: &str) -> Result<String, ValidationError> {
        let body = text.trim();
        if body.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let len = body.chars().count();
        if len > self.config.max_message_len {
            return Err(ValidationError::MessageTooLong { len, max: self.config.max_message_len });
        }
        Ok(body.to_string())
    }

    fn member_filter(&self) -> Filter {
        Filter::all()
            .eq("user_id", self.user_id.clone())
            .eq("room_id", self.room_id.to_string())
    }

    fn presence_row(&self, nickname: &str) -> PresenceEntry {
        PresenceEntry {
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            nickname: nickname.to_string(),
            last_seen: Utc::now(),
        }
    }

    /// Enter the room under `nickname`.
    ///
    /// Subscribes first so nothing written after the presence row is missed,
    /// then announces presence. If the presence write fails the subscription
    /// is released and the room is left exactly as it was.
    pub async fn join(&mut self, nickname: &str) -> Result<(), ChatError> {
        let nickname = self.validate_nickname(nickname)?;
        if self.joined {
            debug!("Already joined {}", self.room_id);
            return Ok(());
        }

        self.feed.open().await.map_err(|e| {
            error!("Failed to subscribe to room {}: {}", self.room_id, e);
            e
        })?;

        let row = Record::Presence(self.presence_row(&nickname));
        let stored = match self.store.upsert(Table::Presence, row, MEMBER_KEY).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("Failed to join room {} as {}: {}", self.room_id, nickname, e);
                self.feed.close();
                return Err(e.into());
            }
        };

        if let Record::Presence(entry) = stored {
            self.online.upsert(entry);
        }
        self.nickname = nickname;
        self.joined = true;
        self.last_heartbeat = Some(Instant::now());
        info!("{} joined {} as {}", self.user_id, self.room_id, self.nickname);

        if let Err(e) = self.load_snapshot().await {
            warn!("Joined {} but failed to load its current state: {}", self.room_id, e);
        }
        Ok(())
    }

    /// History, presence and typing as they are right now.
    async fn load_snapshot(&mut self) -> Result<(), StoreError> {
        let room = Filter::all().eq("room_id", self.room_id.to_string());

        let history = self
            .store
            .select(Table::Messages, &room, Some(Order::asc("created_at")))
            .await?;
        let skip = history.len().saturating_sub(self.config.history_limit);
        let window = self.config.dedup_window();
        for record in history.into_iter().skip(skip) {
            if let Record::Message(message) = record {
                self.messages.apply_remote_insert(message, window);
            }
        }

        let presence = self.store.select(Table::Presence, &room, None).await?;
        for record in presence {
            if let Record::Presence(entry) = record {
                self.online.upsert(entry);
            }
        }

        let now = Utc::now();
        let typing = self.store.select(Table::Typing, &room, None).await?;
        for record in typing {
            if let Record::Typing(entry) = record {
                if entry.user_id != self.user_id {
                    self.typing.upsert(entry);
                }
            }
        }
        self.typing.prune(self.config.typing_timeout(), now);

        debug!(
            "Loaded {} messages, {} online, {} typing in {}",
            self.messages.len(),
            self.online.entries().len(),
            self.typing.entries().len(),
            self.room_id
        );
        Ok(())
    }

    /// Send `text` to the room. The message shows up immediately and is
    /// removed again if the store rejects it.
    pub async fn send_message(&mut self, text: &str) -> Result<ChatMessage, ChatError> {
        let body = self.validate_body(text)?;
        if !self.joined {
            return Err(ChatError::NotJoined(self.room_id.clone()));
        }

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: self.room_id.clone(),
            sender_id: self.user_id.clone(),
            nickname: self.nickname.clone(),
            body,
            created_at: Utc::now(),
        };
        let local_id = message.id.clone();
        self.messages.push_pending(message.clone());

        match self.store.insert(Table::Messages, Record::Message(message)).await {
            Ok(Record::Message(stored)) => {
                debug!("Message {} confirmed as {}", local_id, stored.id);
                self.messages.confirm(&local_id, stored.clone());
                // A delivered message ends the typing burst
                self.stop_typing().await;
                Ok(stored)
            }
            Ok(other) => {
                // Keep showing the optimistic copy; the feed will reconcile
                warn!("Store answered a message insert with {:?}", other);
                self.stop_typing().await;
                self.messages
                    .get(&local_id)
                    .map(|entry| entry.message.clone())
                    .ok_or(ChatError::UnknownMessage(local_id))
            }
            Err(e) => {
                error!("Failed to send message in {}: {}", self.room_id, e);
                match self.messages.rollback(&local_id) {
                    Some(rolled_back) => Err(ChatError::SendFailed {
                        message: Box::new(rolled_back),
                        source: e,
                    }),
                    None => Err(e.into()),
                }
            }
        }
    }

    /// Remove one of our own messages.
    pub async fn delete_message(&mut self, id: &str) -> Result<(), ChatError> {
        let entry = self
            .messages
            .get(id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if entry.message.sender_id != self.user_id {
            return Err(ChatError::NotAuthor(id.to_string()));
        }

        let Some((index, removed)) = self.messages.remove(id) else {
            return Err(ChatError::UnknownMessage(id.to_string()));
        };

        let filter = Filter::all()
            .eq("id", id)
            .eq("sender_id", self.user_id.clone());
        if let Err(e) = self.store.delete(Table::Messages, &filter).await {
            error!("Failed to delete message {}: {}", id, e);
            self.messages.restore(index, removed);
            return Err(e.into());
        }
        Ok(())
    }

    /// Change the nickname shown for us in this room.
    pub async fn rename(&mut self, nickname: &str) -> Result<(), ChatError> {
        let nickname = self.validate_nickname(nickname)?;
        if !self.joined {
            return Err(ChatError::NotJoined(self.room_id.clone()));
        }

        let previous = std::mem::replace(&mut self.nickname, nickname.clone());
        let row = Record::Presence(self.presence_row(&nickname));
        match self.store.upsert(Table::Presence, row, MEMBER_KEY).await {
            Ok(Record::Presence(entry)) => {
                self.online.upsert(entry);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Failed to rename {} to {}: {}", previous, nickname, e);
                self.nickname = previous;
                Err(e.into())
            }
        }
    }

    /// Leave the room. Local state is always cleared; the first cleanup
    /// failure, if any, is returned afterwards.
    pub async fn leave(&mut self) -> Result<(), ChatError> {
        if !self.joined {
            return Ok(());
        }

        let member = self.member_filter();
        let (presence, typing) = futures::join!(
            self.store.delete(Table::Presence, &member),
            self.store.delete(Table::Typing, &member),
        );

        let mut first_error = None;
        for (what, result) in [("presence", presence), ("typing", typing)] {
            if let Err(e) = result {
                error!("Failed to remove {} of {} in {}: {}", what, self.user_id, self.room_id, e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        if self.config.announce_departure {
            let farewell = ChatMessage {
                id: Uuid::new_v4().to_string(),
                room_id: self.room_id.clone(),
                sender_id: SYSTEM_SENDER.to_string(),
                nickname: SYSTEM_SENDER.to_string(),
                body: format!("{} left the chat", self.nickname),
                created_at: Utc::now(),
            };
            if let Err(e) = self.store.insert(Table::Messages, Record::Message(farewell)).await {
                warn!("Failed to announce departure from {}: {}", self.room_id, e);
            }
        }

        self.feed.close();
        self.messages.clear();
        self.online.clear();
        self.typing.clear();
        self.typing_timer.reset();
        self.last_heartbeat = None;
        self.joined = false;
        info!("{} left {}", self.user_id, self.room_id);

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub async fn set_typing(&mut self, is_typing: bool) -> Result<(), ChatError> {
        self.set_typing_at(is_typing, Instant::now(), Utc::now()).await
    }

    /// Keystroke (`true`) or explicit stop (`false`) at the given instants.
    pub async fn set_typing_at(
        &mut self,
        is_typing: bool,
        at: Instant,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        if !self.joined {
            return Err(ChatError::NotJoined(self.room_id.clone()));
        }

        if !is_typing {
            self.stop_typing().await;
            return Ok(());
        }

        if self.typing_timer.keystroke(at) != TypingAction::Upsert {
            return Ok(());
        }

        let row = Record::Typing(TypingEntry {
            user_id: self.user_id.clone(),
            room_id: self.room_id.clone(),
            nickname: self.nickname.clone(),
            typed_at: now,
        });
        if let Err(e) = self.store.upsert(Table::Typing, row, MEMBER_KEY).await {
            error!("Failed to publish typing state in {}: {}", self.room_id, e);
            self.typing_timer.reset();
            return Err(e.into());
        }
        Ok(())
    }

    /// Best-effort removal of our typing row.
    async fn stop_typing(&mut self) {
        if self.typing_timer.stop() == TypingAction::Delete {
            self.delete_own_typing().await;
        }
    }

    async fn delete_own_typing(&self) {
        if let Err(e) = self.store.delete(Table::Typing, &self.member_filter()).await {
            // Observers expire the entry on their own
            warn!("Failed to clear typing state in {}: {}", self.room_id, e);
        }
    }

    pub async fn tick(&mut self) {
        self.tick_at(Instant::now(), Utc::now()).await
    }

    /// Periodic housekeeping: expire our typing deadline, prune stale typing
    /// entries of others and refresh our presence row when due.
    pub async fn tick_at(&mut self, at: Instant, now: DateTime<Utc>) {
        if self.typing_timer.poll(at) == TypingAction::Delete {
            debug!("Typing in {} went idle", self.room_id);
            self.delete_own_typing().await;
        }

        let pruned = self.typing.prune(self.config.typing_timeout(), now);
        if pruned > 0 {
            debug!("Pruned {} stale typing entries in {}", pruned, self.room_id);
        }

        if !self.joined {
            return;
        }
        let heartbeat_due = self
            .last_heartbeat
            .map_or(true, |last| at.duration_since(last) >= self.config.heartbeat());
        if heartbeat_due {
            self.last_heartbeat = Some(at);
            let mut row = self.presence_row(&self.nickname);
            row.last_seen = now;
            if let Err(e) = self.store.upsert(Table::Presence, Record::Presence(row), MEMBER_KEY).await {
                warn!("Presence heartbeat in {} failed: {}", self.room_id, e);
            }
        }
    }

    /// Wait for the next feed event. Never resolves while unsubscribed.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        if self.feed.state() != SubscriptionState::Subscribed {
            return std::future::pending().await;
        }
        self.feed.recv().await
    }

    /// Apply every event already queued on the feed. Returns how many.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.feed.try_recv() {
            self.apply_event(event);
            applied += 1;
        }
        applied
    }

    /// Reconcile local state with one feed event.
    pub fn apply_event(&mut self, event: ChangeEvent) {
        if !self.joined {
            debug!("Ignoring {:?} on {} while not joined", event.kind, event.table);
            return;
        }

        match (event.table, event.kind) {
            (Table::Messages, ChangeKind::Insert) => {
                if let Some(Record::Message(message)) = event.new {
                    self.on_remote_insert(message);
                }
            }
            (Table::Messages, ChangeKind::Delete) => {
                if let Some(Record::Message(message)) = event.old {
                    self.on_remote_delete(&message.id);
                }
            }
            (Table::Messages, ChangeKind::Update) => {
                debug!("Ignoring message update, messages are immutable");
            }
            (Table::Presence, ChangeKind::Delete) => {
                if let Some(Record::Presence(entry)) = event.old {
                    if entry.room_id == self.room_id {
                        self.online.remove(&entry.user_id);
                    }
                }
            }
            (Table::Presence, _) => {
                if let Some(Record::Presence(entry)) = event.new {
                    if entry.room_id == self.room_id {
                        self.online.upsert(entry);
                    }
                }
            }
            (Table::Typing, ChangeKind::Delete) => {
                if let Some(Record::Typing(entry)) = event.old {
                    if entry.room_id == self.room_id {
                        self.typing.remove(&entry.user_id);
                    }
                }
            }
            (Table::Typing, _) => {
                if let Some(Record::Typing(entry)) = event.new {
                    if entry.room_id == self.room_id && entry.user_id != self.user_id {
                        self.typing.upsert(entry);
                    }
                }
            }
        }
    }

    /// A message inserted by anyone, as delivered by the feed.
    pub fn on_remote_insert(&mut self, message: ChatMessage) -> bool {
        if message.room_id != self.room_id {
            return false;
        }
        // A new message from someone ends their typing indicator
        self.typing.remove(&message.sender_id);
        self.messages.apply_remote_insert(message, self.config.dedup_window())
    }

    pub fn on_remote_delete(&mut self, message_id: &str) -> bool {
        self.messages.remove(message_id).is_some()
    }
}
