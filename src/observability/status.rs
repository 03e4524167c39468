//! Liveness status file.
//!
//! The file is replaced on every keepalive acknowledgment so external
//! supervisors can tell how recently the relay answered:
//!
//! ```text
//! Unix: 1760875200
//! Time: 2025-10-19T12:00:00Z
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Render the status file body for `now`.
pub fn render_status(now: DateTime<Utc>) -> String {
    format!(
        "Unix: {}\nTime: {}\n",
        now.timestamp(),
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Overwrite `path` with the current time.
pub async fn write_status(path: &Path) -> std::io::Result<()> {
    tokio::fs::write(path, render_status(Utc::now())).await
}
