//! In-process request handlers.
//!
//! # Responsibilities
//! - Define the `LocalHandler` seam embedding programs implement
//! - Capture status, headers and body through `ResponseWriter`
//! - Adapt any axum `Router` / tower `Service` into a `LocalHandler`
//! - Isolate handler panics in their own task
//!
//! # Design Decisions
//! - A handler that neither writes nor sets a status produced no response
//! - A panicking handler loses its request; the session keeps serving

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use http::{HeaderMap, Request, Response, StatusCode, Version};
use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tower::{Service, ServiceExt};

/// A request handler executed inside the tunnel process.
pub trait LocalHandler: Send + Sync + 'static {
    /// Serve `request`, reporting the outcome through `writer`.
    fn serve<'a>(&'a self, request: Request<Bytes>, writer: &'a mut ResponseWriter)
        -> BoxFuture<'a, ()>;
}

/// Buffers a handler's response until it completes.
#[derive(Debug)]
pub struct ResponseWriter {
    version: Version,
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    body_limit: usize,
}

impl ResponseWriter {
    pub fn new(version: Version) -> Self {
        Self::with_body_limit(version, usize::MAX)
    }

    /// A writer whose handler should not produce a body above `body_limit`.
    pub fn with_body_limit(version: Version, body_limit: usize) -> Self {
        Self {
            version,
            status: None,
            headers: HeaderMap::new(),
            body: BytesMut::new(),
            body_limit,
        }
    }

    /// Largest body the tunnel can carry back for this request.
    pub fn body_limit(&self) -> usize {
        self.body_limit
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set the status code. Later calls are ignored.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    /// Append body bytes, implying `200 OK` if no status was set.
    pub fn write(&mut self, data: &[u8]) {
        self.write_header(StatusCode::OK);
        self.body.extend_from_slice(data);
    }

    /// Produce the captured response, if the handler produced one.
    pub fn finish(self) -> Option<Response<Bytes>> {
        let status = self.status?;
        let mut response = Response::new(self.body.freeze());
        *response.status_mut() = status;
        *response.version_mut() = self.version;
        *response.headers_mut() = self.headers;
        Some(response)
    }
}

/// Why an in-process invocation yielded no response.
#[derive(Debug, Error)]
pub enum LocalError {
    #[error("handler did not produce a response")]
    NoResponse,

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("handler task cancelled")]
    Cancelled,
}

/// Run `handler` for `request` in an isolated task.
pub async fn invoke(
    handler: Arc<dyn LocalHandler>,
    request: Request<Bytes>,
    body_limit: usize,
) -> Result<Response<Bytes>, LocalError> {
    let version = request.version();
    let task = tokio::spawn(async move {
        let mut writer = ResponseWriter::with_body_limit(version, body_limit);
        handler.serve(request, &mut writer).await;
        writer
    });

    match task.await {
        Ok(writer) => writer.finish().ok_or(LocalError::NoResponse),
        Err(e) if e.is_panic() => Err(LocalError::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(LocalError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Serves tunneled requests with a tower service such as an axum `Router`.
#[derive(Debug, Clone)]
pub struct ServiceHandler<S> {
    inner: S,
}

impl<S> ServiceHandler<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S> LocalHandler for ServiceHandler<S>
where
    S: Service<Request<axum::body::Body>, Response = axum::response::Response, Error = Infallible>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    fn serve<'a>(
        &'a self,
        request: Request<Bytes>,
        writer: &'a mut ResponseWriter,
    ) -> BoxFuture<'a, ()> {
        let service = self.inner.clone();
        Box::pin(async move {
            let response = match service.oneshot(request.map(axum::body::Body::from)).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            let (parts, body) = response.into_parts();
            // Left untouched on failure, so the request gets the no-response 502.
            let bytes = match axum::body::to_bytes(body, writer.body_limit()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(limit = writer.body_limit(), error = %e, "Handler body refused");
                    return;
                }
            };
            writer.headers_mut().extend(parts.headers);
            writer.write_header(parts.status);
            writer.write(&bytes);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    struct Silent;

    impl LocalHandler for Silent {
        fn serve<'a>(&'a self, _: Request<Bytes>, _: &'a mut ResponseWriter) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }
    }

    struct Panics;

    impl LocalHandler for Panics {
        fn serve<'a>(&'a self, _: Request<Bytes>, _: &'a mut ResponseWriter) -> BoxFuture<'a, ()> {
            Box::pin(async { panic!("boom") })
        }
    }

    fn get_req(path: &str) -> Request<Bytes> {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    #[test]
    fn write_implies_ok() {
        let mut writer = ResponseWriter::new(Version::HTTP_11);
        writer.headers_mut().insert("x-a", "1".parse().unwrap());
        writer.write(b"hel");
        writer.write(b"lo");
        writer.write_header(StatusCode::IM_A_TEAPOT);

        let resp = writer.finish().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-a"], "1");
        assert_eq!(resp.body().as_ref(), b"hello");
    }

    #[test]
    fn untouched_writer_has_no_response() {
        assert!(ResponseWriter::new(Version::HTTP_11).finish().is_none());
    }

    #[tokio::test]
    async fn silent_handler_is_no_response() {
        let err = invoke(Arc::new(Silent), get_req("/"), usize::MAX).await.unwrap_err();
        assert!(matches!(err, LocalError::NoResponse));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let err = invoke(Arc::new(Panics), get_req("/"), usize::MAX).await.unwrap_err();
        match err {
            LocalError::Panicked(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn axum_router_as_handler() {
        let router = Router::new().route("/hello", get(|| async { "world" }));
        let handler: Arc<dyn LocalHandler> = Arc::new(ServiceHandler::new(router));

        let resp = invoke(handler.clone(), get_req("/hello"), usize::MAX).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"world");

        let resp = invoke(handler, get_req("/missing"), usize::MAX).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn service_body_over_limit_is_refused() {
        let router = Router::new().route("/big", get(|| async { "x".repeat(2048) }));
        let handler: Arc<dyn LocalHandler> = Arc::new(ServiceHandler::new(router));

        let err = invoke(handler.clone(), get_req("/big"), 1024).await.unwrap_err();
        assert!(matches!(err, LocalError::NoResponse));

        let resp = invoke(handler, get_req("/big"), 4096).await.unwrap();
        assert_eq!(resp.body().len(), 2048);
    }
}
