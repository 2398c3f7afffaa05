#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, error, info, warn, LevelFilter};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

mod utils;

use daldal::ai::{endpoint, EndpointResponse, Introduction, OpenAiClient};
use daldal::chat::driver::{self, RoomCommand, RoomUpdate};
use daldal::chat::ChatRoom;
use daldal::config::{self, ChatConfig};
use daldal::models::{random_nickname, room_key, ChatMessage, DeliveryStatus, RoomId, SYSTEM_SENDER};
use daldal::realtime::{janitor, MemoryStore};

/// Command line arguments for daldal
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "daldal: chat, presence and AI matching for the daldal dating app.",
    long_about = "daldal runs the chat synchronization core against an in-process store and \
    exposes the AI matching features.\n\n\
    Optional parameters:\n\
    --config <PATH>     Read settings from this file instead of the per-user config file\n\
    --log-file <PATH>   Append logs to this file (default: daldal.log)\n\
    Use -h or --help to see all options."
)]
struct Args {
    /// Settings file to use instead of <config dir>/daldal/config.json
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH", default_value = "daldal.log", global = true)]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat in a sandbox room backed by an in-process store
    Chat {
        #[arg(long)]
        user: String,
        /// Display name; a random one is picked when omitted
        #[arg(long)]
        nickname: Option<String>,
        /// Talk in the two-person room with this user instead of the global room.
        /// A bot answers on the peer's behalf.
        #[arg(long)]
        peer: Option<String>,
    },
    /// Print the room key of a two-person chat
    RoomKey { a: String, b: String },
    /// Score the compatibility of two introductions (JSON files)
    Compat { a: PathBuf, b: PathBuf },
    /// Pick the best date for an introduction among candidates (JSON files)
    SuperDate { me: PathBuf, candidates: PathBuf },
}

/// Creates a system line for display in the console
fn create_system_message(room_id: &RoomId, content: &str) -> ChatMessage {
    ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        room_id: room_id.clone(),
        sender_id: SYSTEM_SENDER.to_string(),
        nickname: SYSTEM_SENDER.to_string(),
        body: content.to_string(),
        created_at: chrono::Utc::now(),
    }
}

fn print_message(message: &ChatMessage, status: DeliveryStatus) {
    let local = message.created_at.with_timezone(&chrono::Local);
    let marker = match status {
        DeliveryStatus::Pending => " (sending)",
        DeliveryStatus::Confirmed => "",
        DeliveryStatus::RolledBack => " (failed)",
    };
    if message.is_system() {
        println!("[{}] * {}", local.format("%H:%M:%S"), message.body);
    } else {
        println!(
            "[{}] {}: {}{}  #{}",
            local.format("%H:%M:%S"),
            message.nickname,
            message.body,
            marker,
            message.id
        );
    }
}

fn parse_command(line: &str) -> Option<RoomCommand> {
    let (word, rest) = match line.split_once(' ') {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "/nick" => Some(RoomCommand::Rename(rest.to_string())),
        "/delete" => Some(RoomCommand::Delete(rest.to_string())),
        "/join" => Some(RoomCommand::Join(rest.to_string())),
        "/typing" => Some(RoomCommand::Typing(true)),
        "/leave" => Some(RoomCommand::Leave),
        "/quit" => Some(RoomCommand::Shutdown),
        _ if word.starts_with('/') => None,
        _ => Some(RoomCommand::Send(line.to_string())),
    }
}

/// Prints what changed between snapshots.
struct ConsoleView {
    shown: HashSet<String>,
    online: Vec<String>,
    typing: Vec<String>,
}

impl ConsoleView {
    fn new() -> Self {
        ConsoleView {
            shown: HashSet::new(),
            online: Vec::new(),
            typing: Vec::new(),
        }
    }

    fn show(&mut self, update: RoomUpdate) {
        let snapshot = match update {
            RoomUpdate::Alert(text) => {
                print_message(&create_system_message(&RoomId::global(), &text), DeliveryStatus::Confirmed);
                return;
            }
            RoomUpdate::Snapshot(snapshot) => snapshot,
        };

        if !snapshot.joined {
            self.shown.clear();
        }
        for entry in &snapshot.messages {
            // Pending copies are replaced by confirmed ones with a new id
            if entry.status == DeliveryStatus::Confirmed && self.shown.insert(entry.message.id.clone()) {
                print_message(&entry.message, entry.status);
            }
        }

        let online: Vec<String> = snapshot.online.iter().map(|p| p.nickname.clone()).collect();
        if online != self.online {
            println!("-- online: {}", online.join(", "));
            self.online = online;
        }

        let typing: Vec<String> = snapshot.typing.iter().map(|t| t.nickname.clone()).collect();
        if typing != self.typing {
            if !typing.is_empty() {
                println!("-- {} typing...", typing.join(", "));
            }
            self.typing = typing;
        }
    }
}

/// Echo bot standing in for the peer of a two-person room.
fn spawn_peer(store: Arc<MemoryStore>, room_id: RoomId, peer: String, me: String, config: ChatConfig) {
    tokio::spawn(async move {
        let tick = config.tick();
        let mut room = ChatRoom::new(store, room_id, &peer, config);
        if let Err(e) = room.join(&random_nickname()).await {
            error!("Peer {} could not join: {}", peer, e);
            return;
        }
        let mut ticker = tokio::time::interval(tick);
        let mut seen_me = false;
        loop {
            let event = tokio::select! {
                event = room.next_event() => event,
                _ = ticker.tick() => {
                    room.tick().await;
                    continue;
                }
            };
            let Some(event) = event else { break };

            let before = room.messages().len();
            room.apply_event(event);
            let reply = room
                .messages()
                .get(before..)
                .and_then(|new| new.iter().find(|m| m.message.sender_id == me))
                .map(|m| format!("You said \"{}\"", m.message.body));
            if let Some(reply) = reply {
                if let Err(e) = room.send_message(&reply).await {
                    warn!("Peer reply failed: {}", e);
                }
            }

            let me_online = room.online().iter().any(|p| p.user_id == me);
            seen_me |= me_online;
            if seen_me && !me_online {
                debug!("{} went away, peer leaving too", me);
                break;
            }
        }
        if let Err(e) = room.leave().await {
            warn!("Peer cleanup failed: {}", e);
        }
    });
}

async fn run_chat(user: String, nickname: Option<String>, peer: Option<String>, config: ChatConfig) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let sweeper = janitor::spawn(
        store.clone(),
        config.tick(),
        config.presence_ttl(),
        config.typing_timeout(),
    );

    let room_id = match &peer {
        Some(peer) => RoomId::pair(&user, peer),
        None => RoomId::global(),
    };
    if let Some(peer) = peer {
        spawn_peer(store.clone(), room_id.clone(), peer, user.clone(), config.clone());
    }

    let nickname = nickname.unwrap_or_else(random_nickname);
    println!("Joining {} as {}. Commands: /nick <name>, /delete <id>, /typing, /leave, /join <name>, /quit", room_id, nickname);

    let (command_tx, command_rx) = mpsc::channel(32);
    let (update_tx, mut update_rx) = mpsc::channel(256);
    let tick = config.tick();
    let room = ChatRoom::new(store, room_id, &user, config);
    let room_loop = tokio::spawn(driver::run(room, command_rx, update_tx, tick));

    command_tx.send(RoomCommand::Join(nickname)).await?;

    // Stdin is blocking; read it on its own thread
    let input_tx = command_tx.clone();
    std::thread::spawn(move || loop {
        let line = match utils::read_line() {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match parse_command(&line) {
            Some(command) => {
                let quit = command == RoomCommand::Shutdown;
                if input_tx.blocking_send(command).is_err() || quit {
                    break;
                }
            }
            None => println!("Unknown command: {}", line),
        }
    });
    drop(command_tx);

    let mut view = ConsoleView::new();
    while let Some(update) = update_rx.recv().await {
        view.show(update);
    }

    room_loop.await.context("room loop panicked")?;
    sweeper.abort();
    info!("Chat session ended");
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_envelope<T: serde::Serialize>(response: &EndpointResponse<T>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(())
}

async fn run_compat(a: &Path, b: &Path) -> Result<()> {
    let a: Introduction = read_json(a)?;
    let b: Introduction = read_json(b)?;
    let settings = config::load_settings()?;

    let response = match OpenAiClient::from_settings(&settings.ai) {
        Ok(client) => endpoint::compatibility(&client, &a, &b).await,
        Err(e) => EndpointResponse::from(Err(e)),
    };
    print_envelope(&response)
}

async fn run_super_date(me: &Path, candidates: &Path) -> Result<()> {
    let me: Introduction = read_json(me)?;
    let candidates: Vec<Introduction> = read_json(candidates)?;
    let settings = config::load_settings()?;

    let response = match OpenAiClient::from_settings(&settings.ai) {
        Ok(client) => endpoint::super_date(&client, &me, &candidates).await,
        Err(e) => EndpointResponse::from(Err(e)),
    };
    print_envelope(&response)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { LevelFilter::Debug } else { LevelFilter::Info };
    utils::setup_logging(args.log_file.to_str(), level)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", args.log_file.display());

    if let Some(path) = args.config {
        info!("Config file overridden to: {}", path.display());
        config::set_config_path_override(path);
    }

    match args.command {
        Command::Chat { user, nickname, peer } => {
            let settings = config::load_settings()?;
            run_chat(user, nickname, peer, settings.chat).await
        }
        Command::RoomKey { a, b } => {
            println!("{}", room_key(&a, &b));
            Ok(())
        }
        Command::Compat { a, b } => run_compat(&a, &b).await,
        Command::SuperDate { me, candidates } => run_super_date(&me, &candidates).await,
    }
}
