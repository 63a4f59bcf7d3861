//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a phantom-tcp server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (host, port, address family).
    pub listener: ListenerConfig,

    /// Per-connection queue capacities.
    pub queues: QueueConfig,

    /// TCP keepalive applied to every accepted socket.
    pub keepalive: KeepAliveConfig,

    /// Framing protocol settings.
    pub protocol: ProtocolConfig,

    /// Settings for the bundled echo handler.
    pub handler: HandlerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host name or IP address to bind.
    pub host: String,

    /// TCP port (0 picks an ephemeral port).
    pub port: u16,

    /// Address family: "tcp", "tcp4" or "tcp6".
    pub network: String,

    /// Upper bound on a single accept wait, so shutdown is observed promptly.
    pub accept_deadline_ms: u64,
}

impl ListenerConfig {
    /// `host:port` string used for resolution.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn accept_deadline(&self) -> Duration {
        Duration::from_millis(self.accept_deadline_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7070,
            network: "tcp".to_string(),
            accept_deadline_ms: 500,
        }
    }
}

/// Bounded queue capacities for every connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Outbound messages waiting for the write task.
    pub send_capacity: usize,

    /// Parsed inbound packets waiting for dispatch.
    pub receive_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            send_capacity: 64,
            receive_capacity: 64,
        }
    }
}

/// TCP keepalive configuration. A zero value leaves that option untouched.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeepAliveConfig {
    /// Enable SO_KEEPALIVE.
    pub enabled: bool,

    /// Idle time before the first probe, in seconds.
    pub idle_secs: u64,

    /// Number of unanswered probes before the connection is dropped.
    pub count: u32,

    /// Interval between probes, in seconds.
    pub interval_secs: u64,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_secs: 60,
            count: 5,
            interval_secs: 10,
        }
    }
}

/// Which framing protocol the binary serves.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    /// Frames end at a delimiter byte.
    Delimited,
    /// Frames carry a big-endian length header.
    LengthPrefixed,
}

/// Framing protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub kind: ProtocolKind,

    /// Delimiter byte for `delimited` (default `\n`).
    pub delimiter: u8,

    /// Header width in bytes for `length_prefixed`: 1, 2 or 4.
    pub length_width: u8,

    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            kind: ProtocolKind::Delimited,
            delimiter: b'\n',
            length_width: 4,
            max_frame_len: 64 * 1024,
        }
    }
}

/// Echo handler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// How long `on_message` waits for send queue capacity (0 = never wait).
    pub write_timeout_ms: u64,
}

impl HandlerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 1000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("[listener]\nport = 9000\n").unwrap();
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.queues.send_capacity, 64);
        assert_eq!(config.protocol.kind, ProtocolKind::Delimited);
        assert_eq!(config.protocol.delimiter, b'\n');
    }

    #[test]
    fn protocol_kind_is_snake_case() {
        let config: ServerConfig =
            toml::from_str("[protocol]\nkind = \"length_prefixed\"\nlength_width = 2\n").unwrap();
        assert_eq!(config.protocol.kind, ProtocolKind::LengthPrefixed);
        assert_eq!(config.protocol.length_width, 2);
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let listener = ListenerConfig {
            host: "::1".into(),
            port: 80,
            ..ListenerConfig::default()
        };
        assert_eq!(listener.address(), "[::1]:80");
    }
}
