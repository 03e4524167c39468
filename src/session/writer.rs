//! Serialized frame writer.
//!
//! # Responsibilities
//! - Guarantee one writer at a time on a connection's outbound stream
//! - Bound every write by the write deadline
//! - Close the transport on the first write failure
//!
//! # Design Decisions
//! - The sink lives in `Option`; `None` means the transport is gone and
//!   every later write fails fast with `WriteError::Closed`
//! - A pending write is abandoned as soon as the session is force-closed,
//!   so force-close never waits behind a stalled peer
//! - Control frames wait for the lock only as long as the caller allows;
//!   a busy connection skips the ping instead of stalling liveness checks

use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::lifecycle::Shutdown;
use crate::net::WsStream;

type Sink = SplitSink<WsStream, Message>;

/// Outbound write failures. Each one closes the session.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,

    #[error("write deadline of {0:?} exceeded")]
    Timeout(Duration),

    /// Another write held the connection for the whole wait. Nothing was sent.
    #[error("connection busy for {0:?}")]
    Busy(Duration),

    #[error("transport write failed: {0}")]
    Transport(#[from] WsError),
}

/// Outbound half of one tunnel connection.
pub struct FrameWriter {
    sink: Mutex<Option<Sink>>,
    write_timeout: Duration,
    closed: Shutdown,
}

impl FrameWriter {
    pub fn new(sink: Sink, write_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            write_timeout,
            closed: Shutdown::new(),
        }
    }

    /// Fires once the transport has been force-closed.
    pub fn closed(&self) -> &Shutdown {
        &self.closed
    }

    /// Write one complete response frame.
    pub async fn write_frame(&self, frame: Bytes) -> Result<(), WriteError> {
        if self.closed.is_triggered() {
            return Err(WriteError::Closed);
        }
        let guard = self.sink.lock().await;
        self.send_locked(guard, Message::Binary(frame.into()), self.write_timeout)
            .await
    }

    /// Send a ping. Lock wait and write together take at most `within`.
    pub async fn send_ping(&self, within: Duration) -> Result<(), WriteError> {
        self.send_control(Message::Ping(Default::default()), within)
            .await
    }

    /// Send the graceful close notification, bounded like `send_ping`.
    pub async fn send_close(&self, within: Duration) -> Result<(), WriteError> {
        self.send_control(Message::Close(None), within).await
    }

    async fn send_control(&self, message: Message, within: Duration) -> Result<(), WriteError> {
        if self.closed.is_triggered() {
            return Err(WriteError::Closed);
        }
        let started = tokio::time::Instant::now();
        let guard = tokio::select! {
            locked = tokio::time::timeout(within, self.sink.lock()) => {
                locked.map_err(|_| WriteError::Busy(within))?
            }
            _ = self.closed.triggered() => return Err(WriteError::Closed),
        };
        let left = within.saturating_sub(started.elapsed());
        if left.is_zero() {
            return Err(WriteError::Busy(within));
        }
        self.send_locked(guard, message, left).await
    }

    async fn send_locked(
        &self,
        mut guard: MutexGuard<'_, Option<Sink>>,
        message: Message,
        limit: Duration,
    ) -> Result<(), WriteError> {
        if self.closed.is_triggered() {
            guard.take();
            return Err(WriteError::Closed);
        }
        let sink = guard.as_mut().ok_or(WriteError::Closed)?;

        let outcome = tokio::select! {
            sent = tokio::time::timeout(limit, sink.send(message)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(WriteError::Transport(e)),
                Err(_) => Err(WriteError::Timeout(limit)),
            },
            _ = self.closed.triggered() => Err(WriteError::Closed),
        };

        // Whoever holds the lock when the session closes drops the sink.
        if outcome.is_err() || self.closed.is_triggered() {
            guard.take();
            self.closed.trigger();
        }
        outcome
    }

    /// Drop the transport without waiting on the lock. A write in progress
    /// notices the signal and drops the sink itself.
    pub fn force_close(&self) {
        self.closed.trigger();
        if let Ok(mut guard) = self.sink.try_lock() {
            guard.take();
        }
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter")
            .field("write_timeout", &self.write_timeout)
            .field("closed", &self.closed.is_triggered())
            .finish()
    }
}
