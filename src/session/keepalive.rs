//! Connection liveness.
//!
//! # Responsibilities
//! - Ping the relay every `timeout / 3`
//! - Push the deadline forward on every pong, refreshing the status file
//! - On silence: send Close, wait the grace period, force-close
//! - Never block on a response write holding the connection; the deadline
//!   stays armed while a ping waits
//!
//! # Data Flow
//! ```text
//! read loop ── Pong ──▶ watch<Instant> ──▶ keepalive (deadline reset, status file)
//! keepalive ── Ping / Close ──▶ FrameWriter
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::StatusSink;
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, write_status};
use crate::session::writer::{FrameWriter, WriteError};

/// How the keepalive task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveOutcome {
    /// The session ended for another reason.
    Stopped,
    /// No pong arrived within the timeout; the transport was closed.
    TimedOut,
}

/// Timing for one keepalive task.
#[derive(Debug, Clone, Copy)]
pub struct KeepalivePolicy {
    pub interval: Duration,
    pub timeout: Duration,
    pub close_grace: Duration,
}

/// Drive liveness probing until the session drains or the peer goes silent.
pub async fn run(
    writer: Arc<FrameWriter>,
    mut pongs: watch::Receiver<Instant>,
    policy: KeepalivePolicy,
    status: StatusSink,
    draining: Shutdown,
) -> KeepaliveOutcome {
    let mut ticker = tokio::time::interval_at(Instant::now() + policy.interval, policy.interval);
    let deadline = tokio::time::sleep(policy.timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Never wait past the liveness deadline for a busy connection.
                let budget = deadline
                    .deadline()
                    .saturating_duration_since(Instant::now())
                    .min(policy.interval);
                match writer.send_ping(budget).await {
                    Ok(()) => {}
                    Err(WriteError::Busy(_)) => tracing::debug!("Connection busy, ping skipped"),
                    Err(e) => {
                        tracing::debug!(error = %e, "Ping failed");
                        return KeepaliveOutcome::Stopped;
                    }
                }
            }
            changed = pongs.changed() => {
                if changed.is_err() {
                    return KeepaliveOutcome::Stopped;
                }
                let at = *pongs.borrow_and_update();
                deadline.as_mut().reset(at + policy.timeout);
                if let StatusSink::File(path) = &status {
                    if let Err(e) = write_status(path).await {
                        tracing::warn!(path = %path.display(), error = %e, "Cannot write status file");
                    }
                }
            }
            _ = &mut deadline => {
                tracing::warn!(timeout = ?policy.timeout, "Keepalive timeout, closing connection");
                metrics::record_keepalive_timeout();
                let grace_end = Instant::now() + policy.close_grace;
                if let Err(e) = writer.send_close(policy.close_grace).await {
                    tracing::debug!(error = %e, "Close notification failed");
                }
                tokio::select! {
                    _ = tokio::time::sleep_until(grace_end) => {}
                    _ = writer.closed().triggered() => {}
                }
                writer.force_close();
                return KeepaliveOutcome::TimedOut;
            }
            _ = draining.triggered() => return KeepaliveOutcome::Stopped,
            _ = writer.closed().triggered() => return KeepaliveOutcome::Stopped,
        }
    }
}
