//! Server configuration.

use std::time::Duration;

use relay_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub send_queue_capacity: usize,
    /// Keepalive ping interval in seconds; `0` disables keepalive.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this many seconds without any frame.
    pub heartbeat_timeout_secs: u64,
    /// Seconds to wait for connection tasks on shutdown.
    pub shutdown_timeout_secs: u64,
}

/// Keepalive timing for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Keepalive {
    /// Ping interval.
    pub interval: Duration,
    /// Silence tolerated before the peer is dropped.
    pub timeout: Duration,
}

impl ServerConfig {
    /// Keepalive timing, or `None` when disabled.
    pub fn keepalive(&self) -> Option<Keepalive> {
        (self.heartbeat_interval_secs > 0).then(|| Keepalive {
            interval: Duration::from_secs(self.heartbeat_interval_secs),
            timeout: Duration::from_secs(
                self.heartbeat_timeout_secs.max(self.heartbeat_interval_secs),
            ),
        })
    }

    /// Shutdown drain timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            heartbeat_interval_secs: 0,
            heartbeat_timeout_secs: 60,
            shutdown_timeout_secs: 10,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_message_size: s.max_message_size,
            send_queue_capacity: s.send_queue_capacity.max(1),
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            shutdown_timeout_secs: s.shutdown_timeout_secs,
        }
    }
}
