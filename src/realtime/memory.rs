// In-process backend
// Implements the Store contract with plain vectors and fans change events out
// to subscribers the way a hosted realtime feed would.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{ChangeEvent, ChangeKind, Filter, Order, Store, StoreError, Subscription, SubscriptionId, Table};
use crate::models::Record;

/// Buffered events per subscriber before the feed starts dropping.
const FEED_CAPACITY: usize = 256;

struct Subscriber {
    id: SubscriptionId,
    table: Table,
    filter: Filter,
    tx: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<Table, Vec<Record>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscription: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, across all tables.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Copy of every row of `table`, in storage order.
    pub fn rows(&self, table: Table) -> Vec<Record> {
        self.lock_rows()
            .map(|rows| rows.get(&table).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn lock_rows(&self) -> Result<MutexGuard<'_, HashMap<Table, Vec<Record>>>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Unavailable("row storage lock poisoned".to_string()))
    }

    fn check_table(table: Table, row: &Record) -> Result<(), StoreError> {
        if table.holds(row) {
            Ok(())
        } else {
            Err(StoreError::TableMismatch(table))
        }
    }

    /// Deliver an event to every matching subscriber, dropping closed ones.
    fn publish(&self, event: ChangeEvent) {
        let Some(record) = event.record() else {
            return;
        };

        let Ok(mut subscribers) = self.subscribers.lock() else {
            warn!("Subscriber list lock poisoned, dropping {:?} event on {}", event.kind, event.table);
            return;
        };

        subscribers.retain(|sub| {
            if sub.table != event.table || !sub.filter.matches(record) {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(_) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Realtime feed for subscription {:?} is full, event dropped", sub.id);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Subscription {:?} receiver closed, removing", sub.id);
                    false
                }
            }
        });
    }
}

fn compare(a: &Record, b: &Record, order: &Order) -> CmpOrdering {
    let ordering = a.field(order.column).cmp(&b.field(order.column));
    if order.ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, table: Table, row: Record) -> Result<Record, StoreError> {
        Self::check_table(table, &row)?;

        let row = match row {
            // Server assigns the canonical id on confirmation
            Record::Message(mut message) => {
                message.id = Uuid::now_v7().to_string();
                Record::Message(message)
            }
            other => other,
        };

        self.lock_rows()?.entry(table).or_default().push(row.clone());
        debug!("Inserted row into {}", table);

        self.publish(ChangeEvent {
            table,
            kind: ChangeKind::Insert,
            new: Some(row.clone()),
            old: None,
        });
        Ok(row)
    }

    async fn upsert(&self, table: Table, row: Record, conflict_key: &[&str]) -> Result<Record, StoreError> {
        Self::check_table(table, &row)?;

        let mut key = Filter::all();
        for column in conflict_key {
            let value = row
                .field(column)
                .ok_or_else(|| StoreError::MissingConflictColumn(column.to_string()))?;
            key = key.eq(column, value);
        }

        let old = {
            let mut rows = self.lock_rows()?;
            let table_rows = rows.entry(table).or_default();
            match table_rows.iter().position(|existing| key.matches(existing)) {
                Some(index) => Some(std::mem::replace(&mut table_rows[index], row.clone())),
                None => {
                    table_rows.push(row.clone());
                    None
                }
            }
        };

        let kind = if old.is_some() { ChangeKind::Update } else { ChangeKind::Insert };
        debug!("Upserted row into {} ({:?})", table, kind);

        self.publish(ChangeEvent {
            table,
            kind,
            new: Some(row.clone()),
            old,
        });
        Ok(row)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<usize, StoreError> {
        let removed: Vec<Record> = {
            let mut rows = self.lock_rows()?;
            let table_rows = rows.entry(table).or_default();
            let (gone, kept): (Vec<Record>, Vec<Record>) = std::mem::take(table_rows)
                .into_iter()
                .partition(|row| filter.matches(row));
            *table_rows = kept;
            gone
        };

        let count = removed.len();
        for old in removed {
            self.publish(ChangeEvent {
                table,
                kind: ChangeKind::Delete,
                new: None,
                old: Some(old),
            });
        }
        debug!("Deleted {} row(s) from {}", count, table);
        Ok(count)
    }

    async fn select(&self, table: Table, filter: &Filter, order: Option<Order>) -> Result<Vec<Record>, StoreError> {
        let mut rows: Vec<Record> = self
            .lock_rows()?
            .get(&table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = order {
            // Stable sort keeps insertion order for ties
            rows.sort_by(|a, b| compare(a, b, &order));
        }
        Ok(rows)
    }

    async fn subscribe(&self, table: Table, filter: Filter) -> Result<Subscription, StoreError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, events) = mpsc::channel(FEED_CAPACITY);

        self.subscribers
            .lock()
            .map_err(|_| StoreError::Unavailable("subscriber list lock poisoned".to_string()))?
            .push(Subscriber { id, table, filter, tx });

        debug!("Subscription {:?} on {} acknowledged", id, table);
        Ok(Subscription { id, table, events })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|sub| sub.id != id);
            debug!("Subscription {:?} released", id);
        }
    }
}
