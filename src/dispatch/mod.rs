//! Request/response adaptation between tunnel frames and HTTP destinations.
//!
//! # Data Flow
//! ```text
//! http::Request<Bytes> (decoded frame)
//!     → Dispatcher::dispatch
//!         → BackendForwarder (X-Host / fixed base URL, reqwest)
//!         → LocalHandler     (isolated task, ResponseWriter)
//!     → Option<http::Response<Bytes>>  (None = request dropped)
//! ```
//!
//! # Design Decisions
//! - Every outcome except a handler panic produces a response
//! - The destination is resolved once, at validation time

pub mod backend;
pub mod headers;
pub mod local;
pub mod response;

pub use backend::{BackendError, BackendForwarder, BackendRoute};
pub use local::{invoke, LocalError, LocalHandler, ResponseWriter, ServiceHandler};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use std::sync::Arc;

use crate::config::{Destination, EngineSettings};
use crate::observability::metrics;
use crate::protocol::CorrelationId;

/// Executes decoded requests against the configured destination.
#[derive(Clone)]
pub enum Dispatcher {
    Backend(BackendForwarder),
    Local {
        handler: Arc<dyn LocalHandler>,
        body_limit: usize,
    },
}

impl Dispatcher {
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, reqwest::Error> {
        let route = match &settings.destination {
            Destination::InProcess(handler) => {
                return Ok(Dispatcher::Local {
                    handler: handler.clone(),
                    body_limit: settings.max_message_bytes,
                })
            }
            Destination::Fixed(url) => {
                BackendRoute::Fixed(url.as_str().trim_end_matches('/').to_string())
            }
            Destination::Pattern(re) => BackendRoute::Pattern(re.clone()),
        };
        Ok(Dispatcher::Backend(BackendForwarder::new(route, settings.insecure)?))
    }

    /// Produce the response for request `id`, or `None` if it must be dropped.
    pub async fn dispatch(&self, id: CorrelationId, request: Request<Bytes>) -> Option<Response<Bytes>> {
        match self {
            Dispatcher::Backend(forwarder) => Some(forwarder.forward(request).await),
            Dispatcher::Local { handler, body_limit } => {
                let version = request.version();
                let mut request = request;
                headers::strip_hop_by_hop(request.headers_mut());

                match invoke(handler.clone(), request, *body_limit).await {
                    Ok(response) => Some(response),
                    Err(LocalError::NoResponse) => {
                        tracing::warn!(id = %id, "Handler did not produce a response");
                        metrics::record_synthesized(StatusCode::BAD_GATEWAY.as_u16());
                        Some(response::synthesize(
                            version,
                            StatusCode::BAD_GATEWAY,
                            &LocalError::NoResponse.to_string(),
                        ))
                    }
                    Err(e) => {
                        tracing::error!(id = %id, error = %e, "Request dropped");
                        metrics::record_dropped("panic");
                        None
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatcher::Backend(forwarder) => f.debug_tuple("Backend").field(forwarder).finish(),
            Dispatcher::Local { body_limit, .. } => f
                .debug_struct("Local")
                .field("body_limit", body_limit)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;

    struct Echo;

    impl LocalHandler for Echo {
        fn serve<'a>(&'a self, request: Request<Bytes>, writer: &'a mut ResponseWriter) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let seen_host = request.headers().contains_key("host");
                writer.headers_mut().insert("x-saw-host", seen_host.to_string().parse().unwrap());
                writer.write(request.uri().path().as_bytes());
            })
        }
    }

    struct Silent;

    impl LocalHandler for Silent {
        fn serve<'a>(&'a self, _: Request<Bytes>, _: &'a mut ResponseWriter) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    struct Panics;

    impl LocalHandler for Panics {
        fn serve<'a>(&'a self, _: Request<Bytes>, _: &'a mut ResponseWriter) -> BoxFuture<'a, ()> {
            Box::pin(async { panic!("handler fault") })
        }
    }

    fn local(handler: impl LocalHandler) -> Dispatcher {
        Dispatcher::Local {
            handler: Arc::new(handler),
            body_limit: usize::MAX,
        }
    }

    fn request() -> Request<Bytes> {
        Request::builder()
            .uri("/foo")
            .header("Host", "relay.example")
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn local_handler_sees_stripped_headers() {
        let dispatcher = local(Echo);
        let resp = dispatcher.dispatch(CorrelationId::new(1), request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-saw-host"], "false");
        assert_eq!(resp.body().as_ref(), b"/foo");
    }

    #[tokio::test]
    async fn silent_handler_yields_502() {
        let dispatcher = local(Silent);
        let resp = dispatcher.dispatch(CorrelationId::new(2), request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(resp.body().as_ref(), b"handler did not produce a response");
    }

    #[tokio::test]
    async fn panicking_handler_drops_request() {
        let dispatcher = local(Panics);
        assert!(dispatcher.dispatch(CorrelationId::new(0x2a), request()).await.is_none());
        // The dispatcher stays usable afterwards.
        assert!(dispatcher.dispatch(CorrelationId::new(0x2b), request()).await.is_none());
    }
}
