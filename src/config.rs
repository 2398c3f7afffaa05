use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Tunables of the chat view-model and the idle janitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Typing entries older than this are expired
    pub typing_timeout_ms: u64,
    /// Minimum gap between two typing row refreshes while the user keeps typing
    pub typing_refresh_ms: u64,
    pub tick_ms: u64,
    /// Window within which same sender + same body counts as one message
    pub dedup_window_ms: u64,
    pub max_message_len: usize,
    pub max_nickname_len: usize,
    pub history_limit: usize,
    pub heartbeat_secs: u64,
    pub presence_ttl_secs: u64,
    pub announce_departure: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_timeout_ms: 3000,
            typing_refresh_ms: 1000,
            tick_ms: 1000,
            dedup_window_ms: 1000,
            max_message_len: 500,
            max_nickname_len: 32,
            history_limit: 100,
            heartbeat_secs: 30,
            presence_ttl_secs: 120,
            announce_departure: true,
        }
    }
}

impl ChatConfig {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn typing_refresh(&self) -> Duration {
        Duration::from_millis(self.typing_refresh_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }
}

/// Language-model API settings. The key is kept base64-encoded at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
        }
    }
}

impl AiSettings {
    pub fn set_api_key(&mut self, key: &str) {
        self.api_key = Some(BASE64.encode(key));
    }

    pub fn get_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|encoded| {
            String::from_utf8(
                BASE64.decode(encoded).unwrap_or_default()
            ).unwrap_or_default()
        })
    }

    /// Apply `DALDAL_AI_*` environment overrides.
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var("DALDAL_AI_API_KEY") {
            self.set_api_key(&key);
        }
        if let Ok(model) = std::env::var("DALDAL_AI_MODEL") {
            self.model = model;
        }
        if let Ok(endpoint) = std::env::var("DALDAL_AI_ENDPOINT") {
            self.endpoint = endpoint;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chat: ChatConfig,
    pub ai: AiSettings,
}

static CONFIG_PATH_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

/// Use `path` instead of the per-user config file. Only the first call wins.
pub fn set_config_path_override(path: PathBuf) {
    let _ = CONFIG_PATH_OVERRIDE.set(path);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow!("Could not determine config directory"))?
        .join("daldal");

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_config_path() -> Result<PathBuf> {
    if let Some(path) = CONFIG_PATH_OVERRIDE.get() {
        return Ok(path.clone());
    }
    Ok(get_config_dir()?.join("config.json"))
}

pub fn save_settings_to(path: &PathBuf, settings: &Settings) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, settings)?;
    info!("Settings saved to {}", path.display());
    Ok(())
}

/// Missing file yields the defaults; a malformed one is an error.
pub fn load_settings_from(path: &PathBuf) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let settings: Settings = serde_json::from_str(&contents)?;
    info!("Loaded settings from {}", path.display());
    Ok(settings)
}

pub fn load_settings() -> Result<Settings> {
    let mut settings = load_settings_from(&get_config_path()?)?;
    settings.ai = settings.ai.with_env();
    Ok(settings)
}
