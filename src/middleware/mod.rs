//! Handler pipeline — composable request handlers and decorators.
//!
//! Every layer of the pipeline implements [`Handler`]: it receives the parsed
//! [`Request`] plus the [`ResponseWriter`] for the client, and either answers
//! directly or delegates to the handler it wraps.
//!
//! ## Core types
//!
//! - [`Handler`] — trait implemented by every layer, terminal or decorating.
//! - [`handler_fn`] — adapts an async closure returning a [`Response`].
//! - [`Logger`] — request/response logger wrapping another handler.

use std::future::Future;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::http::{Request, Response, ResponseCapture, ResponseWriter};

/// The core trait for every handler in the pipeline.
///
/// Implementors may:
///
/// - **Answer** — write a response into `writer` themselves.
/// - **Delegate** — pass the request and the writer (or a decorator around it)
///   to a wrapped handler.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync` because one instance serves
///   every connection concurrently.
/// - Errors are reserved for failures of the client connection itself; a
///   handler that cannot produce content should still write an error status.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle `request`, writing the response into `writer`.
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()>;
}

#[async_trait]
impl<H> Handler for Arc<H>
where
    H: Handler + ?Sized,
{
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        (**self).serve(request, writer).await
    }
}

#[async_trait]
impl<H> Handler for Box<H>
where
    H: Handler + ?Sized,
{
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        (**self).serve(request, writer).await
    }
}

/// A [`Handler`] built from an async function producing a whole [`Response`].
pub struct HandlerFn<F> {
    f: F,
}

/// Wraps `f` so it can be used anywhere a [`Handler`] is expected.
///
/// # Examples
///
/// ```rust,no_run
/// use emergency_cache::http::{Response, StatusCode};
/// use emergency_cache::middleware::handler_fn;
///
/// let hello = handler_fn(|_req| async { Response::new(StatusCode::OK).body("hello") });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        let response = (self.f)(request).await;
        response.write_to(writer).await
    }
}

/// Decorator that logs each request's method, path, status, and duration.
///
/// Emits a single `tracing::info!` line after the wrapped handler completes:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
pub struct Logger<H> {
    inner: H,
}

impl<H: Handler> Logger<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: Handler> Handler for Logger<H> {
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        let start = Instant::now();
        let method = request.method().as_str().to_owned();
        let path = request.path().to_owned();

        let mut probe = ResponseCapture::status_only(writer);
        let result = self.inner.serve(request, &mut probe).await;
        let status = probe.status().map(|s| s.as_u16()).unwrap_or(200);

        tracing::info!("{} {} - {} ({:?})", method, path, status, start.elapsed());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{BufferedWriter, Method, StatusCode};

    #[tokio::test]
    async fn handler_fn_writes_response() {
        let handler = handler_fn(|req: Request| async move {
            Response::new(StatusCode::OK).body(format!("path={}", req.path()))
        });

        let mut writer = BufferedWriter::new();
        handler
            .serve(Request::builder(Method::Get, "/abc").build(), &mut writer)
            .await
            .unwrap();

        let response = writer.into_response();
        assert_eq!(response.body_ref().as_ref(), b"path=/abc");
    }

    #[tokio::test]
    async fn logger_passes_response_through() {
        let handler = Logger::new(handler_fn(|_req| async {
            Response::new(StatusCode::NOT_FOUND).body("gone")
        }));

        let mut writer = BufferedWriter::new();
        handler
            .serve(Request::builder(Method::Get, "/").build(), &mut writer)
            .await
            .unwrap();

        let response = writer.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body_ref().as_ref(), b"gone");
    }

    #[tokio::test]
    async fn shared_handlers_delegate() {
        let handler: Arc<dyn Handler> =
            Arc::new(handler_fn(|_req| async { Response::new(StatusCode::CREATED) }));

        let mut writer = BufferedWriter::new();
        handler
            .serve(Request::builder(Method::Post, "/").build(), &mut writer)
            .await
            .unwrap();
        assert_eq!(writer.status(), Some(StatusCode::CREATED));
    }
}
