//! HTTP CONNECT proxy dialer.
//!
//! # Responsibilities
//! - Describe the proxy (address, optional Basic credentials)
//! - Open a TCP connection through it with `CONNECT host:port`
//!
//! # Design Decisions
//! - The reply head is read byte by byte so no tunneled bytes are consumed
//! - Any non-2xx reply fails the dial; retry belongs to the engine

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::net::dial::DialError;

/// Upper bound on the proxy's reply head.
const MAX_REPLY_HEAD: usize = 8 * 1024;

/// Resolved proxy endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// `host:port` of the proxy.
    pub addr: String,
    /// Complete `Proxy-Authorization` value, when credentials were given.
    pub authorization: Option<String>,
}

impl ProxySettings {
    /// Build from an `http://[user[:pass]@]host[:port]` URL.
    pub fn from_url(url: &Url) -> Result<Self, String> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| "missing host".to_string())?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| format!("no port for scheme {}", url.scheme()))?;

        let authorization = if url.username().is_empty() {
            None
        } else {
            let credentials = format!("{}:{}", url.username(), url.password().unwrap_or(""));
            Some(format!("Basic {}", STANDARD.encode(credentials)))
        };

        Ok(Self {
            addr: format!("{host}:{port}"),
            authorization,
        })
    }

    /// Connect to `target` (`host:port`) through the proxy.
    pub async fn connect(&self, target: &str) -> Result<TcpStream, DialError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| DialError::Connect {
                addr: self.addr.clone(),
                source,
            })?;

        let mut head = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
        if let Some(auth) = &self.authorization {
            head.push_str("Proxy-Authorization: ");
            head.push_str(auth);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        stream
            .write_all(head.as_bytes())
            .await
            .map_err(|e| DialError::Proxy(format!("write CONNECT: {e}")))?;

        let reply = read_reply_head(&mut stream).await?;
        check_reply(&reply)?;

        tracing::debug!(proxy = %self.addr, target, "Proxy tunnel established");
        Ok(stream)
    }
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("addr", &self.addr)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

async fn read_reply_head(stream: &mut TcpStream) -> Result<Vec<u8>, DialError> {
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_REPLY_HEAD {
            return Err(DialError::Proxy("reply head too large".into()));
        }
        let n = stream
            .read(&mut byte)
            .await
            .map_err(|e| DialError::Proxy(format!("read reply: {e}")))?;
        if n == 0 {
            return Err(DialError::Proxy("connection closed during CONNECT".into()));
        }
        head.push(byte[0]);
    }
    Ok(head)
}

fn check_reply(head: &[u8]) -> Result<(), DialError> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut reply = httparse::Response::new(&mut headers);
    match reply.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        _ => return Err(DialError::Proxy("malformed CONNECT reply".into())),
    }

    let code = reply.code.unwrap_or(0);
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(DialError::Proxy(format!("{} {}", code, reply.reason.unwrap_or(""))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn fake_proxy(reply: &'static [u8]) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 512];
            while !seen.ends_with(b"\r\n\r\n") {
                let n = sock.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
            }
            sock.write_all(reply).await.unwrap();
            String::from_utf8(seen).unwrap()
        });
        (addr, task)
    }

    #[test]
    fn credentials_become_basic_auth() {
        let url = Url::parse("http://user:pw@proxy.local:3128").unwrap();
        let proxy = ProxySettings::from_url(&url).unwrap();
        assert_eq!(proxy.addr, "proxy.local:3128");
        assert_eq!(proxy.authorization.as_deref(), Some("Basic dXNlcjpwdw=="));
        assert!(!format!("{proxy:?}").contains("dXNlcjpwdw"));
    }

    #[test]
    fn default_port_from_scheme() {
        let url = Url::parse("http://proxy.local").unwrap();
        assert_eq!(ProxySettings::from_url(&url).unwrap().addr, "proxy.local:80");
    }

    #[tokio::test]
    async fn connect_hands_over_tunneled_stream() {
        let (addr, task) =
            fake_proxy(b"HTTP/1.1 200 Connection established\r\n\r\nfrom-relay").await;
        let proxy = ProxySettings {
            addr,
            authorization: Some("Basic dXNlcjpwdw==".into()),
        };

        let mut stream = proxy.connect("relay.example:443").await.unwrap();
        let mut rest = String::new();
        stream.read_to_string(&mut rest).await.unwrap();
        assert_eq!(rest, "from-relay");

        let request = task.await.unwrap();
        assert!(request.starts_with("CONNECT relay.example:443 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwdw==\r\n"));
    }

    #[tokio::test]
    async fn non_2xx_reply_fails_with_status_line() {
        let (addr, _task) =
            fake_proxy(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        let proxy = ProxySettings {
            addr,
            authorization: None,
        };

        let err = proxy.connect("relay.example:443").await.unwrap_err();
        match err {
            DialError::Proxy(detail) => assert_eq!(detail, "407 Proxy Authentication Required"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
