//! Tunnel frame codec.
//!
//! A frame is one binary transport message: four ASCII hex digits carrying
//! the correlation id, immediately followed by a raw HTTP/1.x message.
//!
//! ```text
//! 0001GET /foo HTTP/1.1\r\nHost: x\r\n\r\n
//! ^^^^ correlation id (zero-padded, lowercase on output)
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use http::{Request, Response};
use thiserror::Error;

use crate::protocol::message;

/// Width of the hex-encoded correlation id.
pub const ID_LEN: usize = 4;

/// Opaque 16-bit token linking a request frame to its response frame.
///
/// Treated as a bit pattern: it is parsed and echoed, never incremented or
/// compared for order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u16);

impl CorrelationId {
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Parse exactly four hex digits (either case).
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() != ID_LEN || !raw.iter().all(u8::is_ascii_hexdigit) {
            return Err(FrameError::Malformed(format!(
                "invalid correlation id {:?}",
                String::from_utf8_lossy(raw)
            )));
        }
        // Four validated hex digits always fit in a u16.
        let text = std::str::from_utf8(raw).map_err(|e| FrameError::Malformed(e.to_string()))?;
        u16::from_str_radix(text, 16)
            .map(Self)
            .map_err(|e| FrameError::Malformed(e.to_string()))
    }

    fn write(&self, out: &mut BytesMut) {
        out.put_slice(self.to_string().as_bytes());
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

/// Errors produced by the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Bad id prefix or an unparsable HTTP message. Ends the session.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Encoded frame would exceed the transport message limit.
    #[error("message of {len} bytes exceeds limit of {max} bytes")]
    Oversized { len: usize, max: usize },
}

/// Split a frame into its correlation id and HTTP payload.
pub fn split_frame(frame: &[u8]) -> Result<(CorrelationId, &[u8]), FrameError> {
    if frame.len() < ID_LEN {
        return Err(FrameError::Malformed(format!(
            "frame of {} bytes is shorter than its id",
            frame.len()
        )));
    }
    let (id, payload) = frame.split_at(ID_LEN);
    Ok((CorrelationId::parse(id)?, payload))
}

/// Decode an inbound request frame.
pub fn decode_request(frame: &[u8]) -> Result<(CorrelationId, Request<Bytes>), FrameError> {
    let (id, payload) = split_frame(frame)?;
    let request = message::parse_request(payload).map_err(FrameError::Malformed)?;
    Ok((id, request))
}

/// Decode a response frame (the relay's view of our output).
pub fn decode_response(frame: &[u8]) -> Result<(CorrelationId, Response<Bytes>), FrameError> {
    let (id, payload) = split_frame(frame)?;
    let response = message::parse_response(payload).map_err(FrameError::Malformed)?;
    Ok((id, response))
}

/// Encode an outbound response frame, enforcing `max_len`.
pub fn encode_response(
    id: CorrelationId,
    response: &Response<Bytes>,
    max_len: usize,
) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::with_capacity(ID_LEN + 256 + response.body().len());
    id.write(&mut out);
    message::write_response(response, &mut out);
    check_len(out, max_len)
}

/// Encode a request frame, as the relay would.
pub fn encode_request(
    id: CorrelationId,
    request: &Request<Bytes>,
    max_len: usize,
) -> Result<Bytes, FrameError> {
    let mut out = BytesMut::with_capacity(ID_LEN + 256 + request.body().len());
    id.write(&mut out);
    message::write_request(request, &mut out);
    check_len(out, max_len)
}

fn check_len(out: BytesMut, max: usize) -> Result<Bytes, FrameError> {
    if out.len() > max {
        return Err(FrameError::Oversized { len: out.len(), max });
    }
    Ok(out.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode};

    #[test]
    fn id_is_four_lowercase_hex_digits() {
        assert_eq!(CorrelationId::new(1).to_string(), "0001");
        assert_eq!(CorrelationId::new(0x2a).to_string(), "002a");
        assert_eq!(CorrelationId::new(0xffff).to_string(), "ffff");
    }

    #[test]
    fn high_ids_keep_their_bit_pattern() {
        let id = CorrelationId::parse(b"FfFe").unwrap();
        assert_eq!(id.as_u16(), 0xfffe);
        assert_eq!(id.to_string(), "fffe");

        let id = CorrelationId::parse(b"8000").unwrap();
        assert_eq!(id.to_string(), "8000");
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(CorrelationId::parse(b"00g1").is_err());
        assert!(CorrelationId::parse(b"+001").is_err());
        assert!(CorrelationId::parse(b" 001").is_err());
        assert!(CorrelationId::parse(b"001").is_err());
        assert!(split_frame(b"01").is_err());
    }

    #[test]
    fn decodes_request_frame() {
        let (id, req) = decode_request(b"0001GET /foo HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(id, CorrelationId::new(1));
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/foo");
        assert_eq!(req.headers()["host"], "x");
        assert!(req.body().is_empty());
    }

    #[test]
    fn malformed_http_payload() {
        let err = decode_request(b"0001this is not http\r\n\r\n").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn request_frame_survives_relay_encoding() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/items?page=2")
            .header("x-trace", "t1")
            .body(Bytes::from_static(b"{\"a\":1}"))
            .unwrap();
        let frame = encode_request(CorrelationId::new(0xbeef), &req, 1 << 20).unwrap();
        assert!(frame.starts_with(b"beefPOST /api/items?page=2 HTTP/1.1\r\n"));

        let (id, decoded) = decode_request(&frame).unwrap();
        assert_eq!(id.as_u16(), 0xbeef);
        assert_eq!(decoded.uri(), req.uri());
        assert_eq!(decoded.headers()["x-trace"], "t1");
        assert_eq!(decoded.body(), req.body());
    }

    #[test]
    fn encodes_response_frame() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Bytes::from_static(b"hi"))
            .unwrap();
        let frame = encode_response(CorrelationId::new(1), &resp, 1024).unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("0001HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));

        let (id, parsed) = decode_response(&frame).unwrap();
        assert_eq!(id.as_u16(), 1);
        assert_eq!(parsed.body().as_ref(), b"hi");
    }

    #[test]
    fn oversized_response_is_reported() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Bytes::from(vec![b'x'; 4096]))
            .unwrap();
        let err = encode_response(CorrelationId::new(7), &resp, 1024).unwrap_err();
        assert!(matches!(err, FrameError::Oversized { max: 1024, .. }));
    }
}
