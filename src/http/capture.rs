//! A decorating [`ResponseWriter`] that records what passes through it.

use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::{Headers, ResponseWriter, StatusCode};

/// Wraps the client-facing writer, forwarding every call unchanged and
/// immediately while remembering the status and (optionally) the body.
///
/// The status stays `None` until a handler calls
/// [`write_head`](ResponseWriter::write_head) explicitly; an implicit `200`
/// produced by the inner writer on a bare `write` is not recorded.
pub struct ResponseCapture<'a> {
    inner: &'a mut dyn ResponseWriter,
    status: Option<StatusCode>,
    body: BytesMut,
    record_body: bool,
}

impl<'a> ResponseCapture<'a> {
    /// Records status and body.
    pub fn new(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            inner,
            status: None,
            body: BytesMut::new(),
            record_body: true,
        }
    }

    /// Records the status only; body chunks are forwarded without being kept.
    pub fn status_only(inner: &'a mut dyn ResponseWriter) -> Self {
        Self {
            record_body: false,
            ..Self::new(inner)
        }
    }

    /// The last status explicitly written through this capture.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Every body chunk written so far, concatenated in call order.
    pub fn body(&self) -> &BytesMut {
        &self.body
    }

    /// Releases the inner writer, returning the recorded status and body.
    pub fn into_parts(self) -> (Option<StatusCode>, Bytes) {
        (self.status, self.body.freeze())
    }
}

#[async_trait]
impl ResponseWriter for ResponseCapture<'_> {
    fn headers(&self) -> &Headers {
        self.inner.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.inner.headers_mut()
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        self.status = Some(status);
        self.inner.write_head(status).await
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.record_body {
            self.body.extend_from_slice(chunk);
        }
        self.inner.write(chunk).await
    }
}
