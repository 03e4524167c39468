//! HTTP/1.x message parsing and serialization.
//!
//! # Responsibilities
//! - Parse a complete, buffered request or response (head + body)
//! - Determine the body from `Content-Length`, chunked coding, or the end of
//!   the buffer
//! - Serialize buffered messages with a single `Content-Length`
//!
//! # Design Decisions
//! - Messages are fully buffered; the tunnel carries one message per frame
//! - Serialized output is never chunked

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, Method, Request, Response, StatusCode, Version};

/// Upper bound on header count for one message.
const MAX_HEADERS: usize = 128;

/// Parse a complete HTTP/1.x request.
pub fn parse_request(buf: &[u8]) -> Result<Request<Bytes>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err("incomplete request head".to_string()),
        Err(e) => return Err(format!("invalid request head: {e}")),
    };

    let method = Method::from_bytes(req.method.unwrap_or_default().as_bytes())
        .map_err(|e| format!("invalid method: {e}"))?;
    let target = req.path.unwrap_or_default();
    let version = version_from(req.version);
    let header_map = collect_headers(req.headers)?;
    let body = extract_body(&header_map, &buf[head_len..])?;

    let mut builder = Request::builder().method(method).uri(target).version(version);
    if let Some(h) = builder.headers_mut() {
        *h = header_map;
    }
    builder.body(body).map_err(|e| format!("invalid request: {e}"))
}

/// Parse a complete HTTP/1.x response.
pub fn parse_response(buf: &[u8]) -> Result<Response<Bytes>, String> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let head_len = match resp.parse(buf) {
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) => return Err("incomplete response head".to_string()),
        Err(e) => return Err(format!("invalid response head: {e}")),
    };

    let status = StatusCode::from_u16(resp.code.unwrap_or_default())
        .map_err(|e| format!("invalid status: {e}"))?;
    let version = version_from(resp.version);
    let header_map = collect_headers(resp.headers)?;
    let body = extract_body(&header_map, &buf[head_len..])?;

    let mut builder = Response::builder().status(status).version(version);
    if let Some(h) = builder.headers_mut() {
        *h = header_map;
    }
    builder.body(body).map_err(|e| format!("invalid response: {e}"))
}

/// Serialize a request in origin form.
pub fn write_request(req: &Request<Bytes>, out: &mut BytesMut) {
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    out.put_slice(req.method().as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(target.as_bytes());
    out.put_u8(b' ');
    out.put_slice(version_str(req.version()).as_bytes());
    out.put_slice(b"\r\n");
    write_headers(req.headers(), out);
    write_length(req.headers(), req.body().len(), true, out);
    out.put_slice(b"\r\n");
    out.put_slice(req.body());
}

/// Serialize a response with its status line, headers and buffered body.
pub fn write_response(resp: &Response<Bytes>, out: &mut BytesMut) {
    let status = resp.status();
    out.put_slice(version_str(resp.version()).as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.as_str().as_bytes());
    out.put_u8(b' ');
    out.put_slice(status.canonical_reason().unwrap_or("Unknown").as_bytes());
    out.put_slice(b"\r\n");
    write_headers(resp.headers(), out);
    let bodiless = status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;
    write_length(resp.headers(), resp.body().len(), !bodiless, out);
    out.put_slice(b"\r\n");
    if !bodiless {
        out.put_slice(resp.body());
    }
}

fn write_headers(headers: &HeaderMap, out: &mut BytesMut) {
    for (name, value) in headers {
        if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
            continue;
        }
        out.put_slice(name.as_str().as_bytes());
        out.put_slice(b": ");
        out.put_slice(value.as_bytes());
        out.put_slice(b"\r\n");
    }
}

fn write_length(headers: &HeaderMap, body_len: usize, allowed: bool, out: &mut BytesMut) {
    if !allowed {
        return;
    }
    // A body-less reply to HEAD keeps the length the backend announced.
    let announced = headers.get(CONTENT_LENGTH).filter(|_| body_len == 0);
    match announced {
        Some(value) => {
            out.put_slice(b"content-length: ");
            out.put_slice(value.as_bytes());
        }
        None => {
            out.put_slice(b"content-length: ");
            out.put_slice(body_len.to_string().as_bytes());
        }
    }
    out.put_slice(b"\r\n");
}

fn version_from(minor: Option<u8>) -> Version {
    match minor {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    }
}

fn version_str(version: Version) -> &'static str {
    if version == Version::HTTP_10 {
        "HTTP/1.0"
    } else {
        "HTTP/1.1"
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> Result<HeaderMap, String> {
    let mut map = HeaderMap::with_capacity(raw.len());
    for h in raw.iter().filter(|h| !h.name.is_empty()) {
        let name = HeaderName::from_bytes(h.name.as_bytes())
            .map_err(|e| format!("invalid header name {:?}: {e}", h.name))?;
        let value = HeaderValue::from_bytes(h.value)
            .map_err(|e| format!("invalid value for header {:?}: {e}", h.name))?;
        map.append(name, value);
    }
    Ok(map)
}

fn extract_body(headers: &HeaderMap, rest: &[u8]) -> Result<Bytes, String> {
    let chunked = headers
        .get_all(TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return decode_chunked(rest);
    }

    if let Some(value) = headers.get(CONTENT_LENGTH) {
        let len: usize = value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| "invalid content-length".to_string())?;
        if rest.len() < len {
            return Err(format!("body truncated: expected {len} bytes, got {}", rest.len()));
        }
        return Ok(Bytes::copy_from_slice(&rest[..len]));
    }

    // No framing headers: the transport message boundary ends the body.
    Ok(Bytes::copy_from_slice(rest))
}

fn decode_chunked(mut rest: &[u8]) -> Result<Bytes, String> {
    let mut body = BytesMut::new();
    loop {
        let (consumed, size) = match httparse::parse_chunk_size(rest) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return Err("chunk size line not terminated".to_string()),
            Err(_) => return Err("invalid chunk size".to_string()),
        };
        let size = usize::try_from(size).map_err(|_| "chunk size too large".to_string())?;
        rest = &rest[consumed..];

        if size == 0 {
            // Trailers are ignored; the message ends here.
            return Ok(body.freeze());
        }
        if rest.len() < size.saturating_add(2) || &rest[size..size + 2] != b"\r\n" {
            return Err("chunk truncated".to_string());
        }
        body.put_slice(&rest[..size]);
        rest = &rest[size + 2..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_content_length() {
        let raw = b"POST /submit?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 5\r\n\r\nhello";
        let req = parse_request(raw).unwrap();

        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri().path(), "/submit");
        assert_eq!(req.uri().query(), Some("x=1"));
        assert_eq!(req.version(), Version::HTTP_11);
        assert_eq!(req.headers()["host"], "a");
        assert_eq!(req.body().as_ref(), b"hello");
    }

    #[test]
    fn parses_chunked_request() {
        let raw = b"PUT /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n2;ext=1\r\nde\r\n0\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.body().as_ref(), b"abcde");
    }

    #[test]
    fn rejects_truncated_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort";
        assert!(parse_request(raw).unwrap_err().contains("truncated"));
    }

    #[test]
    fn rejects_incomplete_head() {
        assert!(parse_request(b"GET / HTTP/1.1\r\nHost: x\r\n").is_err());
        assert!(parse_request(b"not http at all").is_err());
    }

    #[test]
    fn bad_chunk_framing_is_rejected() {
        let bad_size = b"PUT /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nabc\r\n0\r\n\r\n";
        assert!(parse_request(bad_size).is_err());

        let short = b"PUT /c HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nabc\r\n0\r\n\r\n";
        assert!(parse_request(short).is_err());
    }

    #[test]
    fn response_is_dechunked_on_write() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .header("transfer-encoding", "chunked")
            .header("x-a", "1")
            .body(Bytes::from_static(b"hi"))
            .unwrap();
        let mut out = BytesMut::new();
        write_response(&resp, &mut out);

        let text = std::str::from_utf8(&out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("x-a: 1\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(!text.contains("chunked"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn head_reply_keeps_announced_length() {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .header("content-length", "1234")
            .body(Bytes::new())
            .unwrap();
        let mut out = BytesMut::new();
        write_response(&resp, &mut out);
        assert!(std::str::from_utf8(&out).unwrap().contains("content-length: 1234\r\n"));
    }

    #[test]
    fn no_content_has_no_length_or_body() {
        let resp = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .version(Version::HTTP_10)
            .body(Bytes::new())
            .unwrap();
        let mut out = BytesMut::new();
        write_response(&resp, &mut out);
        assert_eq!(&out[..], b"HTTP/1.0 204 No Content\r\n\r\n");
    }

    #[test]
    fn written_response_parses_back() {
        let resp = Response::builder()
            .status(StatusCode::BAD_GATEWAY)
            .header("content-type", "text/plain")
            .body(Bytes::from_static(b"upstream down"))
            .unwrap();
        let mut out = BytesMut::new();
        write_response(&resp, &mut out);

        let parsed = parse_response(&out).unwrap();
        assert_eq!(parsed.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(parsed.headers()["content-type"], "text/plain");
        assert_eq!(parsed.body().as_ref(), b"upstream down");
    }
}
