//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section implements [`Default`]
//! and is `#[serde(default)]`, so a partial file only overrides what it names.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "url": "wss://search.example.com/ws" },
///   "stream": { "frameIntervalMs": 33 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuarrySettings {
    pub server: ServerSettings,
    pub stream: StreamSettings,
    pub query: QuerySettings,
    pub logging: LoggingSettings,
}

impl QuarrySettings {
    /// Reject values no connection could work with.
    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.as_str();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SettingsError::InvalidValue(format!(
                "server.url must use ws:// or wss://, got {url:?}"
            )));
        }
        if self.server.connect_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue("server.connectTimeoutMs must be positive".into()));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue("server.heartbeatIntervalMs must be positive".into()));
        }
        if self.stream.frame_interval_ms == 0 {
            return Err(SettingsError::InvalidValue("stream.frameIntervalMs must be positive".into()));
        }
        Ok(())
    }
}

/// Backend connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// WebSocket endpoint; the token and collection are appended as query parameters.
    pub url: String,
    /// Upper bound on token fetch plus open handshake.
    pub connect_timeout_ms: u64,
    /// Interval between keep-alive pings while connected.
    pub heartbeat_interval_ms: u64,
}

impl ServerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Answer stream rendering settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Minimum spacing between applied updates (one redraw tick).
    pub frame_interval_ms: u64,
}

impl StreamSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { frame_interval_ms: 16 }
    }
}

/// Optional per-query feature flags. Unset flags are omitted from the wire
/// frame so the backend applies its own default.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuerySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_reasoning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_planning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_deep_search: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON log lines.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = QuarrySettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.server.connect_timeout(), Duration::from_secs(10));
        assert_eq!(settings.server.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(settings.stream.frame_interval(), Duration::from_millis(16));
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn serializes_camel_case_and_omits_unset_flags() {
        let json = serde_json::to_value(QuarrySettings::default()).unwrap();
        assert_eq!(json["server"]["connectTimeoutMs"], 10_000);
        assert_eq!(json["stream"]["frameIntervalMs"], 16);
        assert_eq!(json["query"], serde_json::json!({}));
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let settings: QuarrySettings = serde_json::from_str(r#"{"query": {"useReasoning": true}}"#).unwrap();
        assert_eq!(settings.query.use_reasoning, Some(true));
        assert_eq!(settings.query.use_planning, None);
        assert_eq!(settings.server, ServerSettings::default());
    }

    #[test]
    fn http_url_is_rejected() {
        let mut settings = QuarrySettings::default();
        settings.server.url = "http://localhost:8000".into();
        assert!(matches!(settings.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_frame_interval_is_rejected() {
        let mut settings = QuarrySettings::default();
        settings.stream.frame_interval_ms = 0;
        assert!(settings.validate().is_err());
    }
}
