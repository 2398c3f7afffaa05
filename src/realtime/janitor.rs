// Server-side idle expiry
// Presence and typing rows are only reliably removed here: client cleanup on
// leave or shutdown is not guaranteed to run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::task::JoinHandle;

use super::{Filter, Store, StoreError, Table};
use crate::models::Record;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub presence_removed: usize,
    pub typing_removed: usize,
}

/// Delete presence rows idle for longer than `presence_ttl` and typing rows
/// older than `typing_ttl`, as seen at `now`.
pub async fn sweep_idle<S: Store + ?Sized>(
    store: &S,
    presence_ttl: Duration,
    typing_ttl: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();

    for row in store.select(Table::Presence, &Filter::all(), None).await? {
        if let Record::Presence(entry) = row {
            if is_older_than(entry.last_seen, presence_ttl, now) {
                let key = Filter::all()
                    .eq("user_id", entry.user_id.clone())
                    .eq("room_id", entry.room_id.to_string());
                report.presence_removed += store.delete(Table::Presence, &key).await?;
                info!("Expired idle presence of {} in {}", entry.user_id, entry.room_id);
            }
        }
    }

    for row in store.select(Table::Typing, &Filter::all(), None).await? {
        if let Record::Typing(entry) = row {
            if is_older_than(entry.typed_at, typing_ttl, now) {
                let key = Filter::all()
                    .eq("user_id", entry.user_id.clone())
                    .eq("room_id", entry.room_id.to_string());
                report.typing_removed += store.delete(Table::Typing, &key).await?;
            }
        }
    }

    Ok(report)
}

fn is_older_than(stamp: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(ttl) {
        Ok(ttl) => now - stamp > ttl,
        Err(_) => false,
    }
}

/// Run `sweep_idle` every `every` until the returned task is aborted.
pub fn spawn<S: Store>(
    store: Arc<S>,
    every: Duration,
    presence_ttl: Duration,
    typing_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match sweep_idle(store.as_ref(), presence_ttl, typing_ttl, Utc::now()).await {
                Ok(report) if report != SweepReport::default() => debug!("Idle sweep: {:?}", report),
                Ok(_) => {}
                Err(e) => error!("Idle sweep failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PresenceEntry, RoomId, TypingEntry};
    use crate::realtime::MemoryStore;

    fn presence(user: &str, last_seen: DateTime<Utc>) -> Record {
        Record::Presence(PresenceEntry {
            user_id: user.to_string(),
            room_id: RoomId::global(),
            nickname: user.to_string(),
            last_seen,
        })
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_presence() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .upsert(Table::Presence, presence("stale", now - chrono::Duration::seconds(300)), &["user_id", "room_id"])
            .await
            .unwrap();
        store
            .upsert(Table::Presence, presence("fresh", now - chrono::Duration::seconds(10)), &["user_id", "room_id"])
            .await
            .unwrap();

        let report = sweep_idle(&store, Duration::from_secs(120), Duration::from_secs(3), now).await.unwrap();

        assert_eq!(report.presence_removed, 1);
        let rows = store.rows(Table::Presence);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("user_id").as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_typing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let typing = Record::Typing(TypingEntry {
            user_id: "bob".to_string(),
            room_id: RoomId::global(),
            nickname: "Bob".to_string(),
            typed_at: now - chrono::Duration::seconds(5),
        });
        store.upsert(Table::Typing, typing, &["user_id", "room_id"]).await.unwrap();

        let report = sweep_idle(&store, Duration::from_secs(120), Duration::from_secs(3), now).await.unwrap();
        assert_eq!(report.typing_removed, 1);
        assert!(store.rows(Table::Typing).is_empty());
    }

    #[test]
    fn test_is_older_than_is_strict() {
        let now = Utc::now();
        let ttl = Duration::from_secs(3);
        assert!(!is_older_than(now - chrono::Duration::seconds(3), ttl, now));
        assert!(is_older_than(now - chrono::Duration::milliseconds(3001), ttl, now));
    }
}
