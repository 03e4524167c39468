//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Start engine
//!
//! Shutdown:
//!     SIGTERM/SIGINT → engine stop → current session ends → exit
//! ```
//!
//! # Design Decisions
//! - Invalid configuration is the only fatal startup error
//! - Stop never interrupts a serving session; it prevents the next dial

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
