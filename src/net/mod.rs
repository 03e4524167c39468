//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! EngineSettings
//!     → proxy.rs (optional: TCP to proxy, CONNECT host:port, 2xx required)
//!     → dial.rs  (TCP_NODELAY, TLS for wss://, WebSocket upgrade with Origin)
//!     → WsStream handed to the session layer
//! ```
//!
//! # Design Decisions
//! - Dialing never retries; the engine owns the reconnect policy
//! - Handshake rejections keep the relay's status and a body excerpt

pub mod dial;
pub mod proxy;

pub use dial::{dial, DialError, WsStream};
pub use proxy::ProxySettings;
