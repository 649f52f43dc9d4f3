//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RELAY_*` environment variable overrides
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use relay_core::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the settings file path: `$RELAY_CONFIG`, else
/// `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("RELAY_CONFIG") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a combination that fails
/// [`RelaySettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
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
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Numbers must parse and fall within range; invalid values are ignored with
/// a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("RELAY_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("RELAY_MAX_MESSAGE_SIZE", 1024, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_usize("RELAY_HUB_EVENT_BUFFER", 1, 1_000_000) {
        settings.hub.event_buffer = v;
    }
    if let Some(v) = read_env_usize("RELAY_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.hub.outbound_queue_capacity = v;
    }

    // ── Keepalive ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("RELAY_WRITE_WAIT_MS", 1, 600_000) {
        settings.keepalive.write_wait_ms = v;
    }
    if let Some(v) = read_env_u64("RELAY_PONG_WAIT_MS", 1, 3_600_000) {
        settings.keepalive.pong_wait_ms = v;
    }
    if let Some(v) = read_env_u64("RELAY_PING_PERIOD_MS", 1, 3_600_000) {
        settings.keepalive.ping_period_ms = v;
    }

    // ── Bus ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_string("RELAY_BUS_BROKERS") {
        settings.bus.brokers = v;
    }
    if let Some(v) = read_env_string("RELAY_BUS_GROUP_ID") {
        settings.bus.group_id = v;
    }
    if let Some(v) = read_env_string("RELAY_BUS_TOPICS") {
        settings.bus.topics = parse_list(&v);
    }
    if let Some(v) = read_env_string("RELAY_BUS_OFFSET_RESET") {
        match v.as_str() {
            "earliest" | "latest" => settings.bus.auto_offset_reset = v,
            _ => tracing::warn!(key = "RELAY_BUS_OFFSET_RESET", value = %v, "invalid offset reset, ignoring"),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("RELAY_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(key = "RELAY_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}
