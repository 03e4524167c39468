//! Reverse tunnel endpoint library.
//!
//! Dials a public relay, receives HTTP requests over the tunnel as
//! correlation-id-prefixed frames, executes them against a local backend
//! or an in-process handler, and returns the responses on the same
//! connection.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod net;
pub mod protocol;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::TunnelConfig;
pub use dispatch::{LocalHandler, ResponseWriter, ServiceHandler};
pub use engine::{TunnelEngine, TunnelHandle};
pub use lifecycle::Shutdown;
