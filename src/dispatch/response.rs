//! Synthesized responses for requests that cannot reach a backend.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, DATE, SERVER};
use http::{HeaderValue, Response, StatusCode, Version};

/// `Server` header value on responses produced by the tunnel itself.
pub const SERVER_NAME: &str = "reverse-tunnel";

/// Build a plain-text response carrying `message`.
pub fn synthesize(version: Version, status: StatusCode, message: &str) -> Response<Bytes> {
    let mut response = Response::new(Bytes::copy_from_slice(message.as_bytes()));
    *response.status_mut() = status;
    *response.version_mut() = version;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    if let Ok(date) = HeaderValue::from_str(&http_date()) {
        headers.insert(DATE, date);
    }
    response
}

fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
