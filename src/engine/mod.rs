//! Tunnel engine subsystem.
//!
//! # Data Flow
//! ```text
//! TunnelConfig (+ optional LocalHandler)
//!     → validate → EngineSettings, Dispatcher
//!     → start() → reconnect loop task
//!         → net::dial → Session::run (blocks for the connection's life)
//!         → wait reconnect delay (unconditional) → dial again
//!     → TunnelHandle (stop, is_connected, wait)
//! ```
//!
//! # Design Decisions
//! - Configuration errors are fatal; everything after start is retried
//! - The inter-attempt delay also follows long-lived sessions
//! - Stop is checked between sessions, never mid-session

pub mod runner;

pub use runner::{TunnelEngine, TunnelHandle};
