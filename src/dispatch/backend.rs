//! Forwarding to external HTTP backends.
//!
//! # Responsibilities
//! - Resolve the backend from `X-Host` or the fixed base URL
//! - Rewrite the target to `base + request-target`
//! - Issue the request without following redirects
//! - Turn every failure into a synthesized response
//!
//! # Design Decisions
//! - Redirects are passed through verbatim to the caller
//! - Backend calls bypass proxy environment variables (backends are local)
//! - Request latency is bounded by the client, not the tunnel keepalive

use bytes::Bytes;
use http::{Request, Response, StatusCode, Version};
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::dispatch::headers::{strip_hop_by_hop, take_x_host};
use crate::dispatch::response::synthesize;
use crate::observability::metrics;

/// How the backend for a request is chosen.
#[derive(Debug, Clone)]
pub enum BackendRoute {
    /// One base URL (no trailing slash); `X-Host` is refused.
    Fixed(String),
    /// `X-Host` must be present and fully match the pattern.
    Pattern(Regex),
}

/// Per-request failures, each mapped to a synthesized response.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("X-Host header disallowed by tunnel endpoint (no host pattern configured)")]
    HostNotAllowed,

    #[error("X-Host header '{0}' does not match the configured host pattern")]
    ForbiddenHost(String),

    #[error("X-Host header required by tunnel endpoint (no local server configured)")]
    MissingDestination,

    #[error("Cannot parse request URI")]
    BadRequestTarget,

    #[error("{0}")]
    Upstream(#[from] reqwest::Error),
}

impl BackendError {
    pub fn status(&self) -> StatusCode {
        match self {
            BackendError::HostNotAllowed
            | BackendError::ForbiddenHost(_)
            | BackendError::MissingDestination => StatusCode::FORBIDDEN,
            BackendError::BadRequestTarget => StatusCode::BAD_REQUEST,
            BackendError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Render as the response the relay's caller receives.
    pub fn into_response(self, version: Version) -> Response<Bytes> {
        metrics::record_synthesized(self.status().as_u16());
        synthesize(version, self.status(), &self.to_string())
    }
}

/// Sends tunneled requests to HTTP backends.
#[derive(Debug, Clone)]
pub struct BackendForwarder {
    client: reqwest::Client,
    route: BackendRoute,
}

impl BackendForwarder {
    /// Build the shared client. Fails only if the TLS backend cannot initialize.
    pub fn new(route: BackendRoute, insecure: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(insecure)
            .no_proxy()
            .build()?;
        Ok(Self { client, route })
    }

    /// Resolve the full backend URL for `request`, consuming `X-Host`.
    pub fn resolve(&self, request: &mut Request<Bytes>) -> Result<Url, BackendError> {
        let x_host = take_x_host(request.headers_mut());
        let base = match (&self.route, x_host) {
            (BackendRoute::Fixed(_), Some(_)) => return Err(BackendError::HostNotAllowed),
            (BackendRoute::Fixed(base), None) => base.clone(),
            (BackendRoute::Pattern(re), Some(host)) if re.is_match(&host) => host,
            (BackendRoute::Pattern(re), Some(host)) => {
                tracing::info!(x_host = %host, regexp = %re.as_str(), "X-Host disallowed by pattern");
                return Err(BackendError::ForbiddenHost(host));
            }
            (BackendRoute::Pattern(_), None) => return Err(BackendError::MissingDestination),
        };

        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Url::parse(&format!("{}{}", base.trim_end_matches('/'), target))
            .map_err(|_| BackendError::BadRequestTarget)
    }

    /// Execute `request` against its backend. Always yields a response.
    pub async fn forward(&self, mut request: Request<Bytes>) -> Response<Bytes> {
        let version = request.version();
        let url = match self.resolve(&mut request) {
            Ok(url) => url,
            Err(e) => {
                tracing::info!(error = %e, "Refusing request");
                return e.into_response(version);
            }
        };

        match self.send(url, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::info!(error = %e, "HTTP request error");
                e.into_response(version)
            }
        }
    }

    async fn send(&self, url: Url, request: Request<Bytes>) -> Result<Response<Bytes>, BackendError> {
        let (mut parts, body) = request.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        tracing::debug!(method = %parts.method, url = %url, "HTTP issuing request");

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(parts.headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let version = upstream.version();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await?;

        tracing::debug!(status = %status, len = body.len(), "HTTP responded");

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
