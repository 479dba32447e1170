//! Settings schema for the bridge.
//!
//! All structs use `#[serde(default)]` so a partial settings file is valid.
//! Missing fields are filled with the defaults documented on each field.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root settings structure.
///
/// Loaded from `~/.phonebridge/settings.toml` (or `--config`). Version field
/// enables future migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Schema version for migrations
    pub version: u32,

    /// HTTP/WebSocket server binding
    pub server: ServerSettings,

    /// Extraction polling and stability detection
    pub polling: PollingSettings,

    /// Noise classifier rule table
    pub noise: NoiseSettings,

    /// Durable chat history
    pub history: HistorySettings,

    /// Client heartbeat
    pub heartbeat: HeartbeatSettings,

    /// Client reconnection backoff
    pub reconnect: ReconnectSettings,

    /// Outbound injection
    pub injection: InjectionSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerSettings::default(),
            polling: PollingSettings::default(),
            noise: NoiseSettings::default(),
            history: HistorySettings::default(),
            heartbeat: HeartbeatSettings::default(),
            reconnect: ReconnectSettings::default(),
            injection: InjectionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address. 0.0.0.0 so phones on the LAN can reach the server.
    pub host: String,
    /// Listen port. 0 picks a random free port (tests).
    pub port: u16,
    /// Maximum concurrent logical sessions
    pub max_sessions: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_sessions: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Interval between extraction polls, in milliseconds
    pub interval_ms: u64,

    /// Consecutive idle ticks before a stream is declared complete.
    ///
    /// This debounce is the only completion signal the extraction surface
    /// offers; a long pause mid-generation can be misclassified as a finished
    /// message. Raise it to trade latency for fewer false completions.
    pub stable_threshold: u32,

    /// Force-complete a stream once the buffer exceeds this many bytes
    pub max_buffer_bytes: usize,

    /// Capacity of the recently-seen candidate hash set
    pub dedup_capacity: usize,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            stable_threshold: 6,
            max_buffer_bytes: 256 * 1024,
            dedup_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NoiseSettings {
    /// Path to a TOML rule table. None uses the embedded default table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Directory holding `messages.jsonl` and the daily debug logs.
    /// None resolves to `~/.phonebridge`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// History entries replayed to a newly-opened connection
    pub replay_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            replay_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Seconds between client pings. Keeps intermediary proxies from closing
    /// idle connections; a missed pong is not treated as fatal.
    pub interval_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self { interval_secs: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// First retry delay, in milliseconds
    pub base_ms: u64,
    /// Delay ceiling, in milliseconds
    pub cap_ms: u64,
    /// Attempts before surfacing a terminal disconnect
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_ms: 1000,
            cap_ms: 30_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSettings {
    /// Per-sink timeout budget, in milliseconds
    pub timeout_ms: u64,

    /// Fallback OS command; candidate text is piped to its stdin.
    /// Empty disables the command fallback sink.
    pub fallback_command: String,

    /// Arguments for the fallback command
    pub fallback_args: Vec<String>,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            fallback_command: String::new(),
            fallback_args: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = BridgeSettings::default();
        assert_eq!(s.version, 1);
        assert_eq!(s.server.port, 8000);
        assert_eq!(s.polling.interval_ms, 2000);
        assert_eq!(s.polling.stable_threshold, 6);
        assert_eq!(s.history.replay_limit, 50);
        assert_eq!(s.heartbeat.interval_secs, 25);
        assert_eq!(s.reconnect.base_ms, 1000);
        assert_eq!(s.reconnect.cap_ms, 30_000);
        assert_eq!(s.reconnect.max_attempts, 10);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            [server]
            port = 9090

            [polling]
            stable_threshold = 3
        "#;
        let s: BridgeSettings = toml::from_str(toml_str).unwrap();
        assert_eq!(s.server.port, 9090);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.polling.stable_threshold, 3);
        assert_eq!(s.polling.interval_ms, 2000);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let s: BridgeSettings = toml::from_str("").unwrap();
        assert_eq!(s.polling.dedup_capacity, 4096);
        assert!(s.noise.rules_path.is_none());
        assert!(s.injection.fallback_command.is_empty());
    }

    #[test]
    fn round_trips_through_toml() {
        let s = BridgeSettings::default();
        let text = toml::to_string_pretty(&s).unwrap();
        let back: BridgeSettings = toml::from_str(&text).unwrap();
        assert_eq!(back.polling.max_buffer_bytes, s.polling.max_buffer_bytes);
        assert_eq!(back.reconnect.max_attempts, s.reconnect.max_attempts);
    }
}
