//! Validated, immutable engine settings.
//!
//! Produced once by `validation::validate` and shared via `Arc` by the
//! engine, every session and every request worker.

use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::dispatch::LocalHandler;
use crate::net::ProxySettings;

/// Where tunneled requests are executed.
#[derive(Clone)]
pub enum Destination {
    /// In-process handler; `X-Host` plays no role.
    InProcess(Arc<dyn LocalHandler>),
    /// Single backend base URL; any `X-Host` header is refused.
    Fixed(Url),
    /// Backend chosen per request from `X-Host`, which must fully match.
    Pattern(Regex),
}

impl Destination {
    /// Short description for startup logs.
    pub fn describe(&self) -> String {
        match self {
            Destination::InProcess(_) => "<internal>".to_string(),
            Destination::Fixed(base) => base.as_str().trim_end_matches('/').to_string(),
            Destination::Pattern(re) => format!("x-host ~ {}", re.as_str()),
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::InProcess(_) => f.write_str("InProcess(..)"),
            Destination::Fixed(url) => f.debug_tuple("Fixed").field(&url.as_str()).finish(),
            Destination::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
        }
    }
}

/// Where liveness status is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSink {
    Disabled,
    File(PathBuf),
}

/// Everything the engine needs, resolved and checked.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Rendez-vous token, sent as the `Origin` handshake header.
    pub token: String,
    /// Relay base address without trailing slash.
    pub tunnel_url: String,
    pub destination: Destination,
    /// Skip certificate validation towards HTTPS backends.
    pub insecure: bool,
    pub proxy: Option<ProxySettings>,
    pub status: StatusSink,
    pub max_message_bytes: usize,
    pub keepalive_timeout: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub close_grace: Duration,
    pub reconnect_delay: Duration,
}

impl EngineSettings {
    /// Handshake endpoint on the relay.
    pub fn handshake_url(&self) -> String {
        format!("{}/_tunnel", self.tunnel_url)
    }

    /// Interval between pings.
    pub fn ping_interval(&self) -> Duration {
        self.keepalive_timeout / 3
    }
}
