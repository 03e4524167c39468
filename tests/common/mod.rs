//! Shared utilities for integration testing: a mock relay and mock backends.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use reverse_tunnel::config::TunnelConfig;

pub const TOKEN: &str = "test-token";

/// Accepts tunnel connections the way the public relay does.
pub struct MockRelay {
    pub addr: SocketAddr,
    conns: Mutex<mpsc::UnboundedReceiver<RelayConn>>,
}

/// One tunnel connection as seen from the relay.
pub struct RelayConn {
    pub origin: Option<String>,
    ws: WebSocketStream<TcpStream>,
}

impl MockRelay {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut origin = None;
                    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        if req.uri().path() != "/_tunnel" {
                            let mut err = ErrorResponse::new(Some("unknown path".into()));
                            *err.status_mut() = http::StatusCode::NOT_FOUND;
                            return Err(err);
                        }
                        origin = req
                            .headers()
                            .get("origin")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        Ok(resp)
                    };
                    if let Ok(ws) = tokio_tungstenite::accept_hdr_async(socket, callback).await {
                        let _ = tx.send(RelayConn { origin, ws });
                    }
                });
            }
        });

        Self {
            addr,
            conns: Mutex::new(rx),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next tunnel connection.
    pub async fn next_conn(&self, within: Duration) -> Option<RelayConn> {
        let mut conns = self.conns.lock().await;
        tokio::time::timeout(within, conns.recv()).await.ok().flatten()
    }
}

impl RelayConn {
    /// Push one request frame down the tunnel.
    pub async fn send(&mut self, frame: &[u8]) {
        self.ws
            .send(Message::Binary(frame.to_vec().into()))
            .await
            .unwrap();
    }

    /// Next binary frame, answering nothing else. `None` on timeout or close.
    pub async fn next_frame(&mut self, within: Duration) -> Option<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let next = tokio::time::timeout_at(deadline, self.ws.next()).await.ok()??;
            match next {
                Ok(Message::Binary(data)) => return Some(data.to_vec()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    /// Keep reading (and thereby answering pings) in the background.
    pub fn drain(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { while let Some(Ok(_)) = self.ws.next().await {} })
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Config pointing at `relay`, tuned for fast tests.
pub fn tunnel_config(relay: &MockRelay) -> TunnelConfig {
    let mut config = TunnelConfig {
        token: TOKEN.into(),
        tunnel_url: relay.url(),
        use_env_proxy: false,
        ..TunnelConfig::default()
    };
    config.timeouts.keepalive_secs = 3;
    config.timeouts.close_grace_ms = 200;
    config.timeouts.reconnect_delay_ms = 200;
    config
}

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the request line's target and returns status and body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_backend_with_head(move |head| {
        let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        f(target)
    })
    .await
}

/// Backend answering `200` with `body` that reports every raw request head
/// it receives.
pub async fn start_recording_backend(
    body: &'static str,
) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = start_backend_with_head(move |head| {
        let _ = tx.send(head);
        async move { (200, body.to_string()) }
    })
    .await;
    (addr, rx)
}

/// Like `start_programmable_backend`, but `f` sees the whole request head.
pub async fn start_backend_with_head<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&head).into_owned();
                let (status, body) = f(text).await;
                let reason = http::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Backend that always answers `200` with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}
