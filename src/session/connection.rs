//! Connection session: state machine, read loop and request fan-out.
//!
//! # Responsibilities
//! - Track session state (Opening → Serving → Draining → Closed)
//! - Generate unique session IDs for tracing
//! - Read frames sequentially and spawn one detached worker per request
//! - Close the transport after the draining grace period

use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::config::EngineSettings;
use crate::dispatch::Dispatcher;
use crate::lifecycle::Shutdown;
use crate::net::WsStream;
use crate::observability::metrics;
use crate::protocol::{decode_request, encode_response, FrameError};
use crate::session::keepalive::{self, KeepaliveOutcome, KeepalivePolicy};
use crate::session::writer::FrameWriter;

/// Messages above this size are logged.
const LONG_MESSAGE_BYTES: usize = 1024 * 1024;

/// Relaxed ordering is enough; ids only need to be unique.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sess-{}", self.0)
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport established, loops not yet running.
    Opening,
    /// Reading frames and dispatching requests.
    Serving,
    /// Read loop exited; in-flight workers may still write.
    Draining,
    /// Transport closed. Terminal.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The relay closed the connection.
    RelayClosed,
    /// Transport read failed.
    ReadError(String),
    /// A frame could not be decoded.
    Malformed(FrameError),
    /// No pong within the keepalive timeout.
    KeepaliveTimeout,
    /// A response write failed and closed the transport.
    WriteFailed,
}

impl SessionEnd {
    /// Label for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionEnd::RelayClosed => "relay_closed",
            SessionEnd::ReadError(_) => "read_error",
            SessionEnd::Malformed(_) => "malformed",
            SessionEnd::KeepaliveTimeout => "keepalive_timeout",
            SessionEnd::WriteFailed => "write_failed",
        }
    }
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEnd::ReadError(e) => write!(f, "read error: {e}"),
            SessionEnd::Malformed(e) => write!(f, "{e}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One live tunnel connection. Discarded when it closes.
pub struct Session {
    id: SessionId,
    settings: Arc<EngineSettings>,
    dispatcher: Arc<Dispatcher>,
    state: Arc<watch::Sender<SessionState>>,
}

impl Session {
    /// `state` is shared with the engine so it can report connectivity.
    pub fn new(
        settings: Arc<EngineSettings>,
        dispatcher: Arc<Dispatcher>,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        let session = Self {
            id: SessionId::new(),
            settings,
            dispatcher,
            state,
        };
        session.set_state(SessionState::Opening);
        session
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.state.send_replace(next);
        tracing::trace!(session = %self.id, from = ?prev, to = ?next, "Session state");
    }

    /// Serve `ws` until the connection ends. Never reconnects.
    pub async fn run(self, ws: WsStream) -> SessionEnd {
        let (sink, mut stream) = ws.split();
        let writer = Arc::new(FrameWriter::new(sink, self.settings.write_timeout));
        let (pong_tx, pong_rx) = watch::channel(Instant::now());
        let draining = Shutdown::new();

        let policy = KeepalivePolicy {
            interval: self.settings.ping_interval(),
            timeout: self.settings.keepalive_timeout,
            close_grace: self.settings.close_grace,
        };
        let keepalive = tokio::spawn(keepalive::run(
            writer.clone(),
            pong_rx,
            policy,
            self.settings.status.clone(),
            draining.clone(),
        ));

        self.set_state(SessionState::Serving);
        tracing::info!(session = %self.id, "Tunnel connection established");

        let mut end = self.read_loop(&mut stream, &writer, &pong_tx).await;

        self.set_state(SessionState::Draining);
        draining.trigger();
        tokio::select! {
            _ = tokio::time::sleep(self.settings.close_grace) => {}
            _ = writer.closed().triggered() => {}
        }
        writer.force_close();
        drop(stream);

        if let Ok(KeepaliveOutcome::TimedOut) = keepalive.await {
            end = SessionEnd::KeepaliveTimeout;
        }

        self.set_state(SessionState::Closed);
        metrics::record_session_end(end.as_str());
        tracing::info!(session = %self.id, reason = %end, "Tunnel connection closed");
        end
    }

    async fn read_loop(
        &self,
        stream: &mut SplitStream<WsStream>,
        writer: &Arc<FrameWriter>,
        pongs: &watch::Sender<Instant>,
    ) -> SessionEnd {
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = writer.closed().triggered() => return SessionEnd::WriteFailed,
            };

            match next {
                None => return SessionEnd::RelayClosed,
                Some(Err(WsError::Capacity(e))) => {
                    // The rest of the oversized frame is unread; the stream cannot resync.
                    tracing::warn!(session = %self.id, error = %e, "Oversized message");
                    metrics::record_dropped("oversized");
                    return SessionEnd::ReadError(e.to_string());
                }
                Some(Err(e)) => {
                    tracing::warn!(session = %self.id, error = %e, "Tunnel read failed");
                    return SessionEnd::ReadError(e.to_string());
                }
                Some(Ok(Message::Binary(data))) => {
                    if let Err(e) = self.spawn_worker(Bytes::from(data), writer) {
                        tracing::warn!(session = %self.id, error = %e, "Dropping connection");
                        return SessionEnd::Malformed(e);
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    pongs.send_replace(Instant::now());
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(session = %self.id, frame = ?frame, "Relay sent close");
                }
                Some(Ok(Message::Text(_))) => {
                    tracing::warn!(session = %self.id, "Ignoring text message");
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Decode one request frame and hand it to a detached worker.
    fn spawn_worker(&self, data: Bytes, writer: &Arc<FrameWriter>) -> Result<(), FrameError> {
        if data.len() > LONG_MESSAGE_BYTES {
            tracing::info!(session = %self.id, len = data.len(), "Long message");
        }
        let (id, request) = decode_request(&data)?;
        metrics::record_frame_received();
        tracing::debug!(
            session = %self.id,
            id = %id,
            method = %request.method(),
            uri = %request.uri(),
            "Request"
        );

        let dispatcher = self.dispatcher.clone();
        let writer = writer.clone();
        let max = self.settings.max_message_bytes;
        tokio::spawn(async move {
            let Some(response) = dispatcher.dispatch(id, request).await else {
                return;
            };
            let status = response.status();
            let frame = match encode_response(id, &response, max) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Response dropped");
                    metrics::record_dropped("oversized");
                    return;
                }
            };
            match writer.write_frame(frame).await {
                Ok(()) => {
                    metrics::record_response_written();
                    tracing::debug!(id = %id, status = %status, "Response written");
                }
                Err(e) => {
                    tracing::info!(id = %id, error = %e, "Response lost");
                    metrics::record_dropped("write_failed");
                }
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
        assert!(id2.to_string().starts_with("sess-"));
    }

    #[test]
    fn end_reasons_have_metric_labels() {
        assert_eq!(SessionEnd::KeepaliveTimeout.as_str(), "keepalive_timeout");
        let malformed = SessionEnd::Malformed(FrameError::Malformed("bad id".into()));
        assert_eq!(malformed.as_str(), "malformed");
        assert!(malformed.to_string().contains("bad id"));
    }
}
