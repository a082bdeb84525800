//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the exchange.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the exchange adapter.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Inbound side: listening socket and per-connection behaviour.
    pub listener: ListenerConfig,

    /// Outbound side: connect/read timeouts and reply wait.
    pub sender: SenderConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host or IP to bind (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Listen port. Zero asks the OS for an ephemeral port.
    pub port: u16,

    /// Pending-connection backlog passed to `listen(2)`.
    pub backlog: u32,

    /// How long a single accept may block before the loop reaps finished workers.
    pub accept_timeout_ms: u64,

    /// Upper bound on receiving one document from a peer.
    pub read_timeout_ms: u64,

    /// Acknowledge on the wire and close, instead of handing the socket downstream.
    pub immediate_reply: bool,

    /// Registered protocol variant name.
    pub protocol: String,

    /// Cap on concurrently running workers. `None` spawns without limit.
    pub max_workers: Option<usize>,

    /// What to do at the accept point when `max_workers` is reached.
    pub admission: AdmissionPolicy,
}

impl ListenerConfig {
    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 9000,
            backlog: 256,
            accept_timeout_ms: 6_000,
            read_timeout_ms: 60_000,
            immediate_reply: true,
            protocol: "length-prefixed".to_string(),
            max_workers: None,
            admission: AdmissionPolicy::Queue,
        }
    }
}

/// Backpressure policy when the worker cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionPolicy {
    /// Stop accepting until a worker slot frees up; peers wait in the backlog.
    #[default]
    Queue,
    /// Accept and immediately close connections that find no free slot.
    Reject,
}

/// Outbound sender configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Registered protocol variant name.
    pub protocol: String,

    /// Connect and send timeout in milliseconds.
    pub timeout_ms: u64,

    /// Default wait for a reply when the caller does not supply one.
    pub reply_timeout_ms: u64,
}

impl SenderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            protocol: "length-prefixed".to_string(),
            timeout_ms: 60_000,
            reply_timeout_ms: 300_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ExchangeConfig::default();
        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.listener.backlog, 256);
        assert_eq!(config.listener.accept_timeout(), Duration::from_millis(6_000));
        assert_eq!(config.listener.read_timeout(), Duration::from_millis(60_000));
        assert!(config.listener.immediate_reply);
        assert!(config.listener.max_workers.is_none());
        assert_eq!(config.sender.timeout(), Duration::from_millis(60_000));
        assert_eq!(config.sender.reply_timeout(), Duration::from_millis(300_000));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ExchangeConfig = toml::from_str(
            r#"
            [listener]
            port = 7001
            immediate_reply = false
            admission = "reject"
            max_workers = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.port, 7001);
        assert!(!config.listener.immediate_reply);
        assert_eq!(config.listener.admission, AdmissionPolicy::Reject);
        assert_eq!(config.listener.max_workers, Some(8));
        assert_eq!(config.listener.backlog, 256);
        assert_eq!(config.sender.protocol, "length-prefixed");
    }
}
