//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{conduit_home, ConduitSettings};

/// Resolve the path to the settings file (`~/.conduit/settings.json`).
pub fn settings_path() -> PathBuf {
    conduit_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ConduitSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ConduitSettings> {
    let defaults = serde_json::to_value(ConduitSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ConduitSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `CONDUIT_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut ConduitSettings) {
    let server = &mut settings.server;
    if let Some(v) = env_string("CONDUIT_HOST") {
        server.host = v;
    }
    if let Some(v) = env_in_range("CONDUIT_PORT", 1..=u16::MAX).or_else(|| env_in_range("PORT", 1..=u16::MAX)) {
        server.port = v;
    }
    if let Some(v) = env_string("ALLOWED_ORIGINS") {
        server.allowed_origins = parse_list(&v);
    }
    if let Some(v) = env_in_range("CONDUIT_MAX_SEND_QUEUE", 1..=65_536) {
        server.max_send_queue = v;
    }

    let stream = &mut settings.stream;
    if let Some(v) = env_in_range("CONDUIT_STREAM_MAX_LEN", 1..=1_000_000) {
        stream.max_len = v;
    }
    if let Some(v) = env_in_range("CONDUIT_STREAM_BLOCK_MS", 1..=600_000) {
        stream.block_ms = v;
    }
    if let Some(v) = env_string("CONDUIT_CONSUMER_GROUP") {
        stream.consumer_group = v;
    }

    if let Some(v) = env_string("CONDUIT_LLM_BASE_URL") {
        settings.llm.base_url = v;
    }
    if let Some(v) = env_string("CONDUIT_LLM_MODEL") {
        settings.llm.model = v;
    }
    if let Some(v) = env_in_range("CONDUIT_HISTORY_TAIL", 0..=1_000) {
        settings.history.tail_messages = v;
    }
    if let Some(v) = env_string("CONDUIT_DB_PATH") {
        settings.storage.db_path = PathBuf::from(v);
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `val` and accept it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_in_range<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let raw = std::env::var(name).ok()?;
    let parsed = parse_in_range(&raw, range);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring out-of-range env override");
    }
    parsed
}
