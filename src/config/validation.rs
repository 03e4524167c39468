//! Configuration validation.
//!
//! # Responsibilities
//! - Check token, tunnel URL and backend choice
//! - Resolve optional fields into explicit tagged settings once
//! - Consult proxy environment variables when no proxy is configured
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of its inputs (environment is injected)
//! - Runs before any dial attempt; failures are fatal

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::schema::TunnelConfig;
use crate::config::settings::{Destination, EngineSettings, StatusSink};
use crate::dispatch::LocalHandler;
use crate::net::ProxySettings;

const MIN_KEEPALIVE_SECS: u64 = 3;
const MAX_KEEPALIVE_SECS: u64 = 600;

/// Environment variables consulted for a proxy, in priority order.
pub const PROXY_ENV_VARS: [&str; 4] = ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"];

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("must specify tunnel server ws://hostname:port")]
    MissingTunnelUrl,

    #[error("remote tunnel must begin with ws:// or wss:// (got {0:?})")]
    TunnelScheme(String),

    #[error("invalid tunnel url {url:?}: {reason}")]
    InvalidTunnelUrl { url: String, reason: String },

    #[error("local server must begin with http:// or https:// (got {0:?})")]
    BackendScheme(String),

    #[error("invalid local server url {url:?}: {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("cannot compile host pattern {pattern:?}: {reason}")]
    InvalidHostPattern { pattern: String, reason: String },

    #[error("must specify rendez-vous token")]
    MissingToken,

    #[error("token is not a valid header value")]
    InvalidToken,

    #[error("must specify exactly one of in-process handler, local server or host pattern (got {0})")]
    AmbiguousDestination(String),

    #[error("must specify in-process handler or local server or host pattern")]
    NoDestination,

    #[error("invalid proxy address {value:?}: {reason}")]
    InvalidProxy { value: String, reason: String },

    #[error("max_message_bytes must be greater than zero")]
    ZeroMessageLimit,
}

/// Validate `config`, reading proxy variables from the process environment.
pub fn validate(
    config: &TunnelConfig,
    handler: Option<Arc<dyn LocalHandler>>,
) -> Result<EngineSettings, Vec<ValidationError>> {
    validate_with_env(config, handler, |name| std::env::var(name).ok())
}

/// Validate `config` with an injected environment lookup.
pub fn validate_with_env<E>(
    config: &TunnelConfig,
    handler: Option<Arc<dyn LocalHandler>>,
    env: E,
) -> Result<EngineSettings, Vec<ValidationError>>
where
    E: Fn(&str) -> Option<String>,
{
    let mut errors = Vec::new();

    let tunnel_url = check_tunnel_url(&config.tunnel_url).map_err(|e| errors.push(e)).ok();
    let destination = check_destination(config, handler).map_err(|e| errors.push(e)).ok();

    if config.token.is_empty() {
        errors.push(ValidationError::MissingToken);
    } else if http::HeaderValue::from_str(&config.token).is_err() {
        errors.push(ValidationError::InvalidToken);
    }

    if config.max_message_bytes == 0 {
        errors.push(ValidationError::ZeroMessageLimit);
    }

    let proxy = resolve_proxy(config, &env).map_err(|e| errors.push(e)).ok();

    match (tunnel_url, destination, proxy) {
        (Some(tunnel_url), Some(destination), Some(proxy)) if errors.is_empty() => {
            let status = match &config.status_file {
                Some(path) => StatusSink::File(path.clone()),
                None => StatusSink::Disabled,
            };
            let timeouts = &config.timeouts;
            Ok(EngineSettings {
                token: config.token.clone(),
                tunnel_url,
                destination,
                insecure: config.insecure,
                proxy,
                status,
                max_message_bytes: config.max_message_bytes,
                keepalive_timeout: keepalive_timeout(timeouts.keepalive_secs),
                connect_timeout: Duration::from_secs(timeouts.connect_secs.max(1)),
                write_timeout: Duration::from_secs(timeouts.write_secs.max(1)),
                close_grace: Duration::from_millis(timeouts.close_grace_ms),
                reconnect_delay: Duration::from_millis(timeouts.reconnect_delay_ms),
            })
        }
        _ => Err(errors),
    }
}

/// Clamp the keepalive timeout into the supported range.
pub fn keepalive_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_KEEPALIVE_SECS, MAX_KEEPALIVE_SECS))
}

fn check_tunnel_url(raw: &str) -> Result<String, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::MissingTunnelUrl);
    }
    if !raw.starts_with("ws://") && !raw.starts_with("wss://") {
        return Err(ValidationError::TunnelScheme(raw.to_string()));
    }
    let trimmed = raw.trim_end_matches('/');
    let parsed = Url::parse(trimmed).map_err(|e| ValidationError::InvalidTunnelUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidTunnelUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn check_destination(
    config: &TunnelConfig,
    handler: Option<Arc<dyn LocalHandler>>,
) -> Result<Destination, ValidationError> {
    let backend = config.backend_url.as_deref().filter(|s| !s.is_empty());
    let pattern = config.host_pattern.as_deref().filter(|s| !s.is_empty());

    let mut present = Vec::new();
    if handler.is_some() {
        present.push("in-process handler");
    }
    if backend.is_some() {
        present.push("local server");
    }
    if pattern.is_some() {
        present.push("host pattern");
    }
    if present.len() > 1 {
        return Err(ValidationError::AmbiguousDestination(present.join(" + ")));
    }

    if let Some(handler) = handler {
        return Ok(Destination::InProcess(handler));
    }
    if let Some(raw) = backend {
        return check_backend_url(raw).map(Destination::Fixed);
    }
    if let Some(raw) = pattern {
        let anchored = format!("^(?:{raw})$");
        return Regex::new(&anchored)
            .map(Destination::Pattern)
            .map_err(|e| ValidationError::InvalidHostPattern {
                pattern: raw.to_string(),
                reason: e.to_string(),
            });
    }
    Err(ValidationError::NoDestination)
}

fn check_backend_url(raw: &str) -> Result<Url, ValidationError> {
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return Err(ValidationError::BackendScheme(raw.to_string()));
    }
    let invalid = |reason: String| ValidationError::InvalidBackendUrl {
        url: raw.to_string(),
        reason,
    };
    if raw.chars().any(char::is_whitespace) {
        return Err(invalid("contains whitespace".to_string()));
    }
    let url = Url::parse(raw.trim_end_matches('/')).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}

fn resolve_proxy<E>(config: &TunnelConfig, env: &E) -> Result<Option<ProxySettings>, ValidationError>
where
    E: Fn(&str) -> Option<String>,
{
    let explicit = config.proxy.clone().filter(|p| !p.is_empty());
    let raw = match explicit {
        Some(p) => p,
        None if config.use_env_proxy => {
            match PROXY_ENV_VARS.iter().find_map(|name| env(name).filter(|v| !v.is_empty())) {
                Some(p) => p,
                None => return Ok(None),
            }
        }
        None => return Ok(None),
    };

    let url = match Url::parse(&raw) {
        Ok(url) if url.scheme().starts_with("http") => url,
        // Bare "host:port" parses with a bogus scheme or not at all.
        _ => Url::parse(&format!("http://{raw}")).map_err(|e| ValidationError::InvalidProxy {
            value: raw.clone(),
            reason: e.to_string(),
        })?,
    };

    ProxySettings::from_url(&url)
        .map(Some)
        .map_err(|reason| ValidationError::InvalidProxy { value: raw, reason })
}
