//! Configuration schema definitions.
//!
//! This module defines the raw, user-facing configuration for the tunnel
//! endpoint. All types derive Serde traits for deserialization from TOML.
//! Nothing here is trusted until it passes `validation::validate`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the tunnel endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Rendez-vous token identifying this endpoint to the relay.
    pub token: String,

    /// Relay address (`ws://host:port` or `wss://host:port`).
    pub tunnel_url: String,

    /// Fixed local backend (`http://host:port`) requests are sent to.
    pub backend_url: Option<String>,

    /// Pattern an `X-Host` header must fully match to be used as backend.
    pub host_pattern: Option<String>,

    /// Accept invalid certificates from HTTPS backends.
    pub insecure: bool,

    /// Explicit HTTP proxy used to reach the relay.
    pub proxy: Option<String>,

    /// Fall back to `HTTPS_PROXY`/`HTTP_PROXY` when `proxy` is unset.
    pub use_env_proxy: bool,

    /// File rewritten with a timestamp on every keepalive acknowledgment.
    pub status_file: Option<PathBuf>,

    /// Upper bound for one tunnel message in either direction.
    pub max_message_bytes: usize,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            tunnel_url: String::new(),
            backend_url: None,
            host_pattern: None,
            insecure: false,
            proxy: None,
            use_env_proxy: true,
            status_file: None,
            max_message_bytes: 100 * 1024 * 1024,
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Timeout configuration for the tunnel link.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Keepalive timeout in seconds; pings go out every third of it.
    pub keepalive_secs: u64,

    /// Transport connect + handshake timeout in seconds.
    pub connect_secs: u64,

    /// Deadline for writing one response frame, in seconds.
    pub write_secs: u64,

    /// Grace period before a closing connection is torn down, in milliseconds.
    pub close_grace_ms: u64,

    /// Delay between connection attempts, in milliseconds.
    pub reconnect_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            keepalive_secs: 30,
            connect_secs: 30,
            write_secs: 60,
            close_grace_ms: 5_000,
            reconnect_delay_ms: 10_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Prometheus scrape endpoint bind address, disabled when unset.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_address: None,
        }
    }
}
