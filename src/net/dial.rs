//! Transport dial and WebSocket handshake.
//!
//! # Responsibilities
//! - Resolve `<tunnel_url>/_tunnel` to a TCP target
//! - Connect directly or through the CONNECT proxy
//! - Perform TLS (for `wss://`) and the WebSocket upgrade with the token as `Origin`
//! - Report relay rejections with status and a body excerpt
//!
//! # Design Decisions
//! - One deadline covers TCP connect, proxy negotiation, TLS and upgrade
//! - Message and frame limits come from `max_message_bytes`

use http::header::ORIGIN;
use http::{HeaderValue, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::config::EngineSettings;

/// Established tunnel transport.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bytes of a rejected handshake's body kept for the log.
const REJECT_BODY_EXCERPT: usize = 80;

/// Dial failures. All are retried by the engine after its delay.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("invalid tunnel URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("token is not a valid header value")]
    InvalidToken,

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy CONNECT failed: {0}")]
    Proxy(String),

    #[error("dial timed out after {0:?}")]
    Timeout(Duration),

    #[error("relay rejected handshake: {status} {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] WsError),
}

/// Open a tunnel transport to the relay.
pub async fn dial(settings: &EngineSettings) -> Result<WsStream, DialError> {
    let raw = settings.handshake_url();
    let url = Url::parse(&raw).map_err(|e| DialError::InvalidUrl {
        url: raw.clone(),
        reason: e.to_string(),
    })?;
    let target = target_addr(&url)?;

    tokio::time::timeout(settings.connect_timeout, connect(settings, url, &target))
        .await
        .map_err(|_| DialError::Timeout(settings.connect_timeout))?
}

fn target_addr(url: &Url) -> Result<String, DialError> {
    let invalid = |reason: &str| DialError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;
    Ok(format!("{host}:{port}"))
}

async fn connect(settings: &EngineSettings, url: Url, target: &str) -> Result<WsStream, DialError> {
    let stream = match &settings.proxy {
        Some(proxy) => {
            tracing::debug!(proxy = %proxy.addr, target, "Dialing through proxy");
            proxy.connect(target).await?
        }
        None => TcpStream::connect(target)
            .await
            .map_err(|source| DialError::Connect {
                addr: target.to_string(),
                source,
            })?,
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Cannot set TCP_NODELAY");
    }

    let mut request = url.as_str().into_client_request()?;
    let origin = HeaderValue::from_str(&settings.token).map_err(|_| DialError::InvalidToken)?;
    request.headers_mut().insert(ORIGIN, origin);

    let result = tokio_tungstenite::client_async_tls_with_config(
        request,
        stream,
        Some(ws_config(settings.max_message_bytes)),
        None,
    )
    .await;

    match result {
        Ok((ws, _)) => Ok(ws),
        Err(WsError::Http(response)) => {
            let body = response.body().as_deref().unwrap_or_default();
            let excerpt = &body[..body.len().min(REJECT_BODY_EXCERPT)];
            Err(DialError::Rejected {
                status: response.status(),
                body: String::from_utf8_lossy(excerpt).into_owned(),
            })
        }
        Err(e) => Err(DialError::Handshake(e)),
    }
}

/// Transport limits for one tunnel message.
pub fn ws_config(max_message_bytes: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_bytes);
    config.max_frame_size = Some(max_message_bytes);
    config
}
