//! Settings sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConduitSettings {
    pub server: ServerSettings,
    pub stream: StreamSettings,
    pub llm: LlmSettings,
    pub history: HistorySettings,
    pub storage: StorageSettings,
}

impl ConduitSettings {
    /// Reject combinations that would make the server misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.stream.max_len == 0 {
            return Err(SettingsError::InvalidValue("stream.maxLen must be > 0".into()));
        }
        if self.stream.block_ms == 0 {
            return Err(SettingsError::InvalidValue("stream.blockMs must be > 0".into()));
        }
        if self.stream.consumer_group.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "stream.consumerGroup must not be empty".into(),
            ));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// CORS origins. Empty or `*` allows any origin.
    pub allowed_origins: Vec<String>,
    /// Outbound frames buffered per connection before drops.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8945,
            allowed_origins: Vec::new(),
            max_send_queue: 256,
        }
    }
}

/// Event-log and relay settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Entries retained per channel.
    pub max_len: usize,
    /// How long one relay read blocks waiting for new entries.
    pub block_ms: u64,
    pub consumer_group: String,
    /// How long a finished channel stays readable.
    pub terminal_retention_secs: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_len: 1000,
            block_ms: 5000,
            consumer_group: "websocket-consumer-group".to_string(),
            terminal_retention_secs: 300,
        }
    }
}

/// OpenAI-compatible model endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 90,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistorySettings {
    /// Messages of recent history given to each decision.
    pub tail_messages: usize,
    /// Owner recorded on persisted chat histories.
    pub default_identity: String,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            tail_messages: 10,
            default_identity: "default".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: conduit_home().join("database").join("conduit.db"),
        }
    }
}

/// `~/.conduit`, or `/tmp/.conduit` without a home directory.
pub fn conduit_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".conduit")
}
