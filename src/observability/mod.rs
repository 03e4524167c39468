//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events, panic reports)
//!     → metrics.rs (counters for frames, dials, keepalive, drops)
//!     → status.rs  (liveness timestamp file, rewritten on every pong)
//!
//! Consumers:
//!     → stdout (human-readable or JSON lines)
//!     → Metrics endpoint (Prometheus scrape, optional)
//!     → External supervisors polling the status file
//! ```
//!
//! # Design Decisions
//! - `RUST_LOG` overrides the configured level
//! - Metrics are recorded through the `metrics` facade; without an
//!   installed exporter they are no-ops

pub mod logging;
pub mod metrics;
pub mod status;

pub use logging::{init_logging, install_panic_hook};
pub use status::write_status;
