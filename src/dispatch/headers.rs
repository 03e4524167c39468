//! Header manipulation for forwarded requests.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers
//! - Read and strip the `X-Host` routing header
//!
//! # Design Decisions
//! - `HeaderMap` names are lowercase, so matching is case-insensitive for free

use http::HeaderMap;

/// Routing header naming the backend for a single request.
pub const X_HOST: &str = "x-host";

/// Connection-scoped headers that must not be forwarded.
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Remove every hop-by-hop header (all values).
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Remove `X-Host`, returning its first value if it was present and readable.
pub fn take_x_host(headers: &mut HeaderMap) -> Option<String> {
    let value = headers
        .get(X_HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    headers.remove(X_HOST);
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_request;

    #[test]
    fn strips_mixed_case_hop_headers() {
        let frame = b"0001GET / HTTP/1.1\r\n\
            HoSt: example\r\n\
            CONNECTION: keep-alive\r\n\
            Keep-Alive: timeout=5\r\n\
            te: trailers\r\n\
            Trailers: x\r\n\
            Upgrade: websocket\r\n\
            proxy-AUTHORIZATION: Basic Zm9v\r\n\
            Proxy-Authenticate: Basic\r\n\
            Accept: */*\r\n\r\n";
        let (_, req) = decode_request(frame).unwrap();
        let mut headers = req.headers().clone();

        strip_hop_by_hop(&mut headers);

        for name in HOP_BY_HOP {
            assert!(headers.get(name).is_none(), "{name} survived");
        }
        assert_eq!(headers["accept"], "*/*");
    }

    #[test]
    fn strips_repeated_values() {
        let mut headers = HeaderMap::new();
        headers.append("connection", "a".parse().unwrap());
        headers.append("connection", "b".parse().unwrap());
        strip_hop_by_hop(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn takes_x_host() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Host", "http://10.0.0.1:80".parse().unwrap());
        assert_eq!(take_x_host(&mut headers).as_deref(), Some("http://10.0.0.1:80"));
        assert!(headers.get(X_HOST).is_none());
        assert_eq!(take_x_host(&mut headers), None);
    }
}
