//! Connection session subsystem.
//!
//! # Data Flow
//! ```text
//! WsStream (from net::dial)
//!     → split into read half and FrameWriter (mutex-guarded sink)
//!     → connection.rs read loop: one frame at a time
//!         → decode → spawn detached worker → Dispatcher
//!         → encode → FrameWriter::write_frame (serialized, write deadline)
//!     → keepalive.rs: ping every timeout/3, pong resets deadline
//!
//! Session States:
//!     Opening → Serving → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Responses go only to the connection that carried the request; a dead
//!   connection drops them
//! - Workers are never awaited; the read loop keeps reading immediately

pub mod connection;
pub mod keepalive;
pub mod writer;

pub use connection::{Session, SessionEnd, SessionId, SessionState};
pub use writer::{FrameWriter, WriteError};
