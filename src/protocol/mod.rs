//! Tunnel wire protocol.
//!
//! # Data Flow
//! ```text
//! Binary transport message
//!     → frame.rs (4-hex-digit correlation id + payload split)
//!     → message.rs (HTTP/1.x head + body parse)
//!     → (CorrelationId, http::Request<Bytes>)
//!
//! (CorrelationId, http::Response<Bytes>)
//!     → message.rs (status line, headers, Content-Length, body)
//!     → frame.rs (id prefix, size limit)
//!     → Binary transport message
//! ```
//!
//! # Design Decisions
//! - No length field: the transport message boundary ends the frame
//! - Ids are opaque 16-bit patterns, always written as 4 lowercase hex digits

pub mod frame;
pub mod message;

pub use frame::{
    decode_request, decode_response, encode_request, encode_response, CorrelationId, FrameError,
};
