// Workbench settings
// Loaded from ~/.config/tidemark/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BRIDGE_PORT: u16 = 60123;
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Command bridge
    #[serde(rename = "bridge.port")]
    pub bridge_port: u16,

    #[serde(rename = "bridge.maxConnections")]
    pub max_connections: usize,

    #[serde(rename = "bridge.commandTimeoutMs")]
    pub command_timeout_ms: u64,

    #[serde(rename = "bridge.maxMessageBytes")]
    pub max_message_bytes: usize,

    // History
    #[serde(rename = "history.capacity")]
    pub history_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bridge_port: DEFAULT_BRIDGE_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tidemark");
        config_dir.join("settings.json")
    }

    /// Load settings from the user config dir, falling back to defaults.
    /// A missing file is created with commented defaults.
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Load settings from `path`. Never fails: unreadable or malformed files
    /// log a warning and yield defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                log::warn!("Error parsing {}: {}; using default settings", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON, ignoring lines that start with `//`.
    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");
        serde_json::from_str(&cleaned)
    }

    /// Save current settings to disk
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Error creating config directory: {}", e);
                return;
            }
        }

        let default_config = r#"{
    // Command bridge (JSONL over TCP on 127.0.0.1)
    "bridge.port": 60123,
    "bridge.maxConnections": 5,
    "bridge.commandTimeoutMs": 5000,
    "bridge.maxMessageBytes": 10485760,

    // Undo history entries kept per plot
    "history.capacity": 50
}
"#;

        if let Err(e) = fs::write(path, default_config) {
            log::warn!("Error writing default settings.json: {}", e);
        }
    }
}
