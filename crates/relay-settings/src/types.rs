//! Settings types for the server, both endpoints, and logging.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Largest accepted `server.maxConnections`.
pub const MAX_CONNECTIONS_LIMIT: usize = 1_000_000;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Chat endpoint behavior.
    pub chat: ChatSettings,
    /// Feed endpoint behavior.
    pub feed: FeedSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(SettingsError::InvalidValue("server.host must not be empty".into()));
        }
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&self.server.max_connections) {
            return Err(SettingsError::InvalidValue(format!(
                "server.maxConnections must be between 1 and {MAX_CONNECTIONS_LIMIT}, got {}",
                self.server.max_connections
            )));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be > 0".into(),
            ));
        }
        if self.chat.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "chat.sendQueueCapacity must be > 0".into(),
            ));
        }
        if self.chat.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "chat.heartbeatIntervalSecs must be > 0".into(),
            ));
        }
        if self.feed.interval_ms == 0 {
            return Err(SettingsError::InvalidValue("feed.intervalMs must be > 0".into()));
        }
        for (name, path) in [("chat.path", &self.chat.path), ("feed.path", &self.feed.path)] {
            if !path.starts_with('/') {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} must start with '/', got {path:?}"
                )));
            }
        }
        if self.chat.path == self.feed.path {
            return Err(SettingsError::InvalidValue(format!(
                "chat.path and feed.path must differ, both are {:?}",
                self.chat.path
            )));
        }
        Ok(())
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections across both endpoints.
    pub max_connections: usize,
    /// Largest inbound WebSocket message accepted, in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for the server task before giving up.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Chat endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Route the chat endpoint is served on.
    pub path: String,
    /// Deliver a sender's own messages back to it.
    pub echo_to_sender: bool,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// How long a feed push waits for queue space, and how long a closing
    /// connection's writer gets to flush.
    pub send_timeout_ms: u64,
    /// Ping interval.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without any inbound frame.
    pub heartbeat_timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            path: "/ws".to_string(),
            echo_to_sender: false,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
        }
    }
}

/// Feed endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    /// Route the feed endpoint is served on.
    pub path: String,
    /// Time between payloads in milliseconds.
    pub interval_ms: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            path: "/orderbookfeed".to_string(),
            interval_ms: 2_000,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(SettingsError::InvalidValue(format!("unknown log format {other:?}"))),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` takes precedence).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Per-module level overrides, e.g. `("relay_server", "debug")`.
    pub module_levels: Vec<(String, String)>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
            module_levels: Vec::new(),
        }
    }
}
