//! Runtime server configuration.

use std::time::Duration;

use relay_settings::RelaySettings;

use crate::websocket::broadcast::EchoPolicy;

/// Configuration for [`crate::RelayServer`], resolved from [`RelaySettings`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections across both endpoints.
    pub max_connections: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for the server task.
    pub shutdown_timeout: Duration,
    /// Chat endpoint route.
    pub chat_path: String,
    /// Whether senders receive their own messages.
    pub echo: EchoPolicy,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// How long one send may wait for queue space.
    pub send_timeout: Duration,
    /// Chat heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Chat heartbeat timeout.
    pub heartbeat_timeout: Duration,
    /// Feed endpoint route.
    pub feed_path: String,
    /// Time between feed payloads.
    pub feed_interval: Duration,
}

impl ServerConfig {
    /// Resolve runtime configuration from loaded settings.
    pub fn from_settings(settings: &RelaySettings) -> Self {
        let chat = &settings.chat;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_connections: settings.server.max_connections,
            max_message_size: settings.server.max_message_size,
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            chat_path: chat.path.clone(),
            echo: EchoPolicy::from_echo_flag(chat.echo_to_sender),
            send_queue_capacity: chat.send_queue_capacity,
            send_timeout: Duration::from_millis(chat.send_timeout_ms),
            heartbeat_interval: Duration::from_secs(chat.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(chat.heartbeat_timeout_secs),
            feed_path: settings.feed.path.clone(),
            feed_interval: Duration::from_millis(settings.feed.interval_ms),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&RelaySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.chat_path, "/ws");
        assert_eq!(cfg.feed_path, "/orderbookfeed");
        assert_eq!(cfg.echo, EchoPolicy::ExcludeSender);
        assert_eq!(cfg.feed_interval, Duration::from_secs(2));
        assert_eq!(cfg.send_timeout, Duration::from_secs(5));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(90));
    }

    #[test]
    fn echo_flag_maps_to_policy() {
        let mut settings = RelaySettings::default();
        settings.chat.echo_to_sender = true;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.echo, EchoPolicy::IncludeSender);
    }

    #[test]
    fn custom_values() {
        let mut settings = RelaySettings::default();
        settings.server.port = 0;
        settings.server.max_connections = 5;
        settings.feed.interval_ms = 100;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_connections, 5);
        assert_eq!(cfg.feed_interval, Duration::from_millis(100));
    }
}
