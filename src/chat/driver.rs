// Room event loop
// One task owns the view-model and interleaves user commands, feed events and
// the housekeeping tick. Nothing here runs in parallel with the view-model.

use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::sync::mpsc;

use super::{ChatError, ChatRoom, RoomSnapshot};
use crate::realtime::Store;

#[derive(Debug, Clone, PartialEq)]
pub enum RoomCommand {
    Join(String),
    Send(String),
    Typing(bool),
    Rename(String),
    Delete(String),
    Leave,
    /// Leave and stop the loop
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomUpdate {
    Snapshot(RoomSnapshot),
    /// User-facing error text; the loop keeps running
    Alert(String),
}

async fn publish(updates: &mpsc::Sender<RoomUpdate>, update: RoomUpdate) {
    if let Err(e) = updates.send(update).await {
        debug!("Room update receiver gone: {}", e);
    }
}

/// Resolves at the owner's typing deadline; never while not typing.
async fn typing_idle(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

async fn housekeeping<S: Store>(room: &mut ChatRoom<S>, updates: &mpsc::Sender<RoomUpdate>) {
    let before = room.typing().len();
    room.tick().await;
    if room.typing().len() != before {
        publish(updates, RoomUpdate::Snapshot(room.snapshot())).await;
    }
}

async fn execute<S: Store>(room: &mut ChatRoom<S>, command: RoomCommand) -> Result<(), ChatError> {
    match command {
        RoomCommand::Join(nickname) => room.join(&nickname).await,
        RoomCommand::Send(text) => room.send_message(&text).await.map(|_| ()),
        RoomCommand::Typing(is_typing) => room.set_typing(is_typing).await,
        RoomCommand::Rename(nickname) => room.rename(&nickname).await,
        RoomCommand::Delete(id) => room.delete_message(&id).await,
        RoomCommand::Leave | RoomCommand::Shutdown => room.leave().await,
    }
}

/// Drive `room` until `Shutdown` arrives, the command channel closes or the
/// feed is lost. The room is left on the way out.
pub async fn run<S: Store>(
    mut room: ChatRoom<S>,
    mut commands: mpsc::Receiver<RoomCommand>,
    updates: mpsc::Sender<RoomUpdate>,
    tick_every: Duration,
) {
    let mut ticker = tokio::time::interval(tick_every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Room loop for {} started", room.room_id());

    loop {
        let typing_deadline = room.typing_deadline();
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("Command channel closed");
                    break;
                };
                let shutdown = command == RoomCommand::Shutdown;
                if let Err(e) = execute(&mut room, command).await {
                    error!("Room command failed in {}: {}", room.room_id(), e);
                    publish(&updates, RoomUpdate::Alert(e.to_string())).await;
                }
                publish(&updates, RoomUpdate::Snapshot(room.snapshot())).await;
                if shutdown {
                    info!("Room loop for {} stopped", room.room_id());
                    return;
                }
            }
            event = room.next_event() => {
                match event {
                    Some(event) => {
                        room.apply_event(event);
                        publish(&updates, RoomUpdate::Snapshot(room.snapshot())).await;
                    }
                    None => {
                        error!("Realtime feed for {} closed", room.room_id());
                        publish(&updates, RoomUpdate::Alert("Connection to the chat was lost".to_string())).await;
                        break;
                    }
                }
            }
            _ = ticker.tick() => housekeeping(&mut room, &updates).await,
            _ = typing_idle(typing_deadline) => {
                debug!("Typing deadline reached in {}", room.room_id());
                housekeeping(&mut room, &updates).await;
            }
        }
    }

    if let Err(e) = room.leave().await {
        error!("Cleanup on exit from {} failed: {}", room.room_id(), e);
    }
    info!("Room loop for {} stopped", room.room_id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::models::RoomId;
    use crate::realtime::{ChangeKind, Filter, MemoryStore, Store, SubscriptionId, Table};
    use std::sync::Arc;

    fn last_snapshot(updates: &mut mpsc::Receiver<RoomUpdate>) -> Option<RoomSnapshot> {
        let mut last = None;
        while let Ok(update) = updates.try_recv() {
            if let RoomUpdate::Snapshot(snapshot) = update {
                last = Some(snapshot);
            }
        }
        last
    }

    #[tokio::test]
    async fn test_loop_runs_commands_and_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        let room = ChatRoom::new(store.clone(), RoomId::global(), "alice", ChatConfig::default());
        let (command_tx, command_rx) = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(room, command_rx, update_tx, Duration::from_millis(50)));

        command_tx.send(RoomCommand::Join("Alice".to_string())).await.unwrap();
        command_tx.send(RoomCommand::Send("hello".to_string())).await.unwrap();
        command_tx.send(RoomCommand::Send("   ".to_string())).await.unwrap();
        command_tx.send(RoomCommand::Shutdown).await.unwrap();
        handle.await.unwrap();

        let mut alerts = 0;
        let mut saw_message = false;
        while let Ok(update) = update_rx.try_recv() {
            match update {
                RoomUpdate::Alert(_) => alerts += 1,
                RoomUpdate::Snapshot(snapshot) => {
                    saw_message |= snapshot.messages.iter().any(|m| m.message.body == "hello");
                }
            }
        }
        assert_eq!(alerts, 1, "only the blank message should be rejected");
        assert!(saw_message);
        assert!(store.rows(Table::Presence).is_empty());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closing_commands_leaves_room() {
        let store = Arc::new(MemoryStore::new());
        let room = ChatRoom::new(store.clone(), RoomId::global(), "bob", ChatConfig::default());
        let (command_tx, command_rx) = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(room, command_rx, update_tx, Duration::from_millis(50)));
        command_tx.send(RoomCommand::Join("Bob".to_string())).await.unwrap();
        drop(command_tx);
        handle.await.unwrap();

        let snapshot = last_snapshot(&mut update_rx).unwrap();
        assert!(snapshot.joined);
        assert!(store.rows(Table::Presence).is_empty());
    }

    #[tokio::test]
    async fn test_leave_then_rejoin_keeps_loop_running() {
        let store = Arc::new(MemoryStore::new());
        let room = ChatRoom::new(store.clone(), RoomId::global(), "alice", ChatConfig::default());
        let (command_tx, command_rx) = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(room, command_rx, update_tx, Duration::from_millis(50)));
        for command in [
            RoomCommand::Join("Alice".to_string()),
            RoomCommand::Leave,
            RoomCommand::Join("Alice".to_string()),
            RoomCommand::Send("back".to_string()),
            RoomCommand::Shutdown,
        ] {
            command_tx.send(command).await.unwrap();
        }
        handle.await.unwrap();

        let mut alerts = 0;
        let mut joined = Vec::new();
        let mut saw_message = false;
        while let Ok(update) = update_rx.try_recv() {
            match update {
                RoomUpdate::Alert(_) => alerts += 1,
                RoomUpdate::Snapshot(snapshot) => {
                    joined.push(snapshot.joined);
                    saw_message |= snapshot.joined && snapshot.messages.iter().any(|m| m.message.body == "back");
                }
            }
        }
        assert_eq!(alerts, 0);
        let left_at = joined.iter().position(|j| !j).unwrap();
        assert!(joined[..left_at].contains(&true));
        assert!(joined[left_at..].contains(&true), "room should be joined again after leaving");
        assert!(saw_message);
        assert!(store.rows(Table::Presence).is_empty());
    }

    #[tokio::test]
    async fn test_lost_feed_stops_loop() {
        let store = Arc::new(MemoryStore::new());
        let room = ChatRoom::new(store.clone(), RoomId::global(), "alice", ChatConfig::default());
        let (command_tx, command_rx) = mpsc::channel(16);
        let (update_tx, mut update_rx) = mpsc::channel(256);

        let handle = tokio::spawn(run(room, command_rx, update_tx, Duration::from_millis(50)));
        command_tx.send(RoomCommand::Join("Alice".to_string())).await.unwrap();
        loop {
            match update_rx.recv().await {
                Some(RoomUpdate::Snapshot(snapshot)) if snapshot.joined => break,
                Some(_) => continue,
                None => panic!("Loop stopped before joining"),
            }
        }

        // The backend drops all three room feeds
        for id in 1..=3 {
            store.unsubscribe(SubscriptionId(id));
        }
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop should stop once the feed is gone")
            .unwrap();

        let mut alerts = Vec::new();
        while let Ok(update) = update_rx.try_recv() {
            if let RoomUpdate::Alert(text) = update {
                alerts.push(text);
            }
        }
        assert_eq!(alerts, vec!["Connection to the chat was lost".to_string()]);
        assert!(store.rows(Table::Presence).is_empty());
        assert!(command_tx.is_closed());
    }

    #[tokio::test]
    async fn test_typing_row_cleared_at_deadline() {
        let store = Arc::new(MemoryStore::new());
        let mut typing_feed = store.subscribe(Table::Typing, Filter::all()).await.unwrap();
        let config = ChatConfig {
            typing_timeout_ms: 100,
            ..ChatConfig::default()
        };
        let room = ChatRoom::new(store.clone(), RoomId::global(), "alice", config);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (update_tx, _update_rx) = mpsc::channel(256);

        // The tick alone would not come round again during this test
        let handle = tokio::spawn(run(room, command_rx, update_tx, Duration::from_secs(10)));
        command_tx.send(RoomCommand::Join("Alice".to_string())).await.unwrap();
        command_tx.send(RoomCommand::Typing(true)).await.unwrap();

        let written = typing_feed.events.recv().await.unwrap();
        assert_eq!(written.kind, ChangeKind::Insert);
        let cleared = tokio::time::timeout(Duration::from_secs(2), typing_feed.events.recv())
            .await
            .expect("typing row should be removed at the deadline")
            .unwrap();
        assert_eq!(cleared.kind, ChangeKind::Delete);
        assert!(store.rows(Table::Typing).is_empty());

        command_tx.send(RoomCommand::Shutdown).await.unwrap();
        handle.await.unwrap();
    }
}
