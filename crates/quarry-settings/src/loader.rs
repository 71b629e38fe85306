//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`QuarrySettings::default()`]
//! 2. If `~/.quarry/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `QUARRY_*` environment variable overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::QuarrySettings;

/// Resolve the path to the settings file (`~/.quarry/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".quarry").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<QuarrySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid final value is
/// an error.
pub fn load_settings_from_path(path: &Path) -> Result<QuarrySettings> {
    load_with_overrides(path, |name| std::env::var(name).ok())
}

/// [`load_settings_from_path`] with an explicit variable lookup.
pub fn load_with_overrides(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<QuarrySettings> {
    let defaults = serde_json::to_value(QuarrySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: QuarrySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `QUARRY_*` overrides read through `lookup`.
///
/// Values are parsed strictly; invalid ones are logged and ignored.
pub fn apply_overrides(settings: &mut QuarrySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("QUARRY_SERVER_URL") {
        settings.server.url = v;
    }
    if let Some(v) = env.u64("QUARRY_CONNECT_TIMEOUT_MS", 100, 300_000) {
        settings.server.connect_timeout_ms = v;
    }
    if let Some(v) = env.u64("QUARRY_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("QUARRY_FRAME_INTERVAL_MS", 1, 1_000) {
        settings.stream.frame_interval_ms = v;
    }

    if let Some(v) = env.bool("QUARRY_USE_REASONING") {
        settings.query.use_reasoning = Some(v);
    }
    if let Some(v) = env.bool("QUARRY_USE_PLANNING") {
        settings.query.use_planning = Some(v);
    }
    if let Some(v) = env.bool("QUARRY_USE_DEEP_SEARCH") {
        settings.query.use_deep_search = Some(v);
    }

    if let Some(v) = env.string("QUARRY_LOG_LEVEL") {
        match parse_level(&v) {
            Some(level) => settings.logging.level = level.to_string(),
            None => warn!(key = "QUARRY_LOG_LEVEL", value = %v, "invalid log level, ignoring"),
        }
    }
    if let Some(v) = env.bool("QUARRY_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut QuarrySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalise a log level name.
pub fn parse_level(val: &str) -> Option<&'static str> {
    match val.trim().to_lowercase().as_str() {
        "error" => Some("error"),
        "warn" | "warning" => Some("warn"),
        "info" => Some("info"),
        "debug" => Some("debug"),
        "trace" => Some("trace"),
        _ => None,
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    fn no_vars(_: &str) -> Option<String> {
        None
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"url": "ws://a", "connectTimeoutMs": 1}});
        let source = serde_json::json!({"server": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["url"], "ws://b");
        assert_eq!(merged["server"]["connectTimeoutMs"], 1);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(serde_json::json!({"x": [1, 2, 3]}), serde_json::json!({"x": [4]}));
        assert_eq!(merged["x"], serde_json::json!([4]));
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_with_overrides(Path::new("/nonexistent/settings.json"), no_vars).unwrap();
        assert_eq!(settings, QuarrySettings::default());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"url": "wss://search.example.com/ws"}, "stream": {"frameIntervalMs": 50}}"#,
        )
        .unwrap();

        let settings = load_with_overrides(&path, no_vars).unwrap();
        assert_eq!(settings.server.url, "wss://search.example.com/ws");
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.stream.frame_interval_ms, 50);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_with_overrides(&path, no_vars);
        assert!(matches!(result.unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_non_websocket_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"url": "https://example.com"}}"#).unwrap();

        let result = load_with_overrides(&path, no_vars);
        assert!(matches!(result.unwrap_err(), SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"stream": {"frameIntervalMs": 50}, "logging": {"level": "info"}}"#).unwrap();

        let settings = load_with_overrides(
            &path,
            vars(&[
                ("QUARRY_FRAME_INTERVAL_MS", "100"),
                ("QUARRY_USE_DEEP_SEARCH", "yes"),
                ("QUARRY_LOG_LEVEL", "DEBUG"),
            ]),
        )
        .unwrap();
        assert_eq!(settings.stream.frame_interval_ms, 100);
        assert_eq!(settings.query.use_deep_search, Some(true));
        assert_eq!(settings.query.use_reasoning, None);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = QuarrySettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("QUARRY_FRAME_INTERVAL_MS", "0"),
                ("QUARRY_HEARTBEAT_INTERVAL_MS", "soon"),
                ("QUARRY_LOG_JSON", "maybe"),
                ("QUARRY_LOG_LEVEL", "loud"),
                ("QUARRY_SERVER_URL", ""),
            ]),
        );
        assert_eq!(settings, QuarrySettings::default());
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "off", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("30000", 1000, 600_000), Some(30_000));
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_u64_range("abc", 1000, 600_000), None);
    }

    #[test]
    fn parse_level_normalises() {
        assert_eq!(parse_level(" Warning "), Some("warn"));
        assert_eq!(parse_level("TRACE"), Some("trace"));
        assert_eq!(parse_level("verbose"), None);
    }
}
