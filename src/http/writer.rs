//! Response sinks.
//!
//! Handlers never build a wire message directly: they mutate headers, write a
//! status, then stream body chunks into a [`ResponseWriter`]. The server hands
//! every handler a [`ConnectionWriter`] bound to the client socket; tests and
//! embedders can collect a [`Response`] with a [`BufferedWriter`] instead.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::{Headers, Response, StatusCode, is_hop_by_hop};

/// A streaming HTTP response sink.
///
/// # Contract
///
/// - Header mutations made through [`headers_mut`](Self::headers_mut) only take
///   effect if they happen before the head is written.
/// - [`write_head`](Self::write_head) sends the status line and headers; later
///   calls are ignored by the connection-backed writer.
/// - [`write`](Self::write) without a prior `write_head` implies `200 OK`.
#[async_trait]
pub trait ResponseWriter: Send {
    /// Returns the response headers accumulated so far.
    fn headers(&self) -> &Headers;

    /// Returns the response headers for mutation.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Writes the status line and headers.
    async fn write_head(&mut self, status: StatusCode) -> io::Result<()>;

    /// Writes one body chunk.
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
}

// How the body is delimited on the wire once the head is out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Fixed { remaining: u64 },
    Chunked,
    CloseDelimited,
    Empty,
}

/// A [`ResponseWriter`] that streams straight onto a client connection.
///
/// Bodies are sent with `Content-Length` when the handler declared one, with
/// chunked transfer encoding otherwise (or close-delimited for HTTP/1.0
/// peers). Call [`finish`](Self::finish) once the handler returns.
pub struct ConnectionWriter<'a, S> {
    stream: &'a mut S,
    headers: Headers,
    framing: Option<Framing>,
    keep_alive: bool,
    http10: bool,
    head_only: bool,
}

impl<'a, S> ConnectionWriter<'a, S>
where
    S: AsyncWrite + Unpin + Send,
{
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            headers: Headers::new(),
            framing: None,
            keep_alive: true,
            http10: false,
            head_only: false,
        }
    }

    /// Whether the connection stays open after this response.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Marks the peer as HTTP/1.0, which rules out chunked encoding.
    #[must_use]
    pub fn http10(mut self, http10: bool) -> Self {
        self.http10 = http10;
        self
    }

    /// Suppresses the body (responses to `HEAD`).
    #[must_use]
    pub fn head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    /// Returns `true` once the status line has been sent.
    pub fn head_written(&self) -> bool {
        self.framing.is_some()
    }

    /// Completes the response: writes a default `200 OK` head if the handler
    /// wrote nothing, terminates a chunked body and flushes.
    ///
    /// Returns whether the connection may be reused.
    ///
    /// # Errors
    ///
    /// Propagates socket write errors.
    pub async fn finish(mut self) -> io::Result<bool> {
        if self.framing.is_none() {
            self.write_head(StatusCode::OK).await?;
        }
        match self.framing {
            Some(Framing::Chunked) => self.stream.write_all(b"0\r\n\r\n").await?,
            Some(Framing::Fixed { remaining }) if remaining != 0 => {
                debug!(remaining, "response body shorter than its Content-Length");
                self.keep_alive = false;
            }
            Some(Framing::CloseDelimited) => self.keep_alive = false,
            _ => {}
        }
        self.stream.flush().await?;
        Ok(self.keep_alive)
    }

    fn choose_framing(&self, status: StatusCode) -> Framing {
        if self.head_only || status.is_bodiless() {
            return Framing::Empty;
        }
        let declared = self
            .headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        match declared {
            Some(remaining) => Framing::Fixed { remaining },
            None if self.http10 => Framing::CloseDelimited,
            None => Framing::Chunked,
        }
    }
}

#[async_trait]
impl<S> ResponseWriter for ConnectionWriter<'_, S>
where
    S: AsyncWrite + Unpin + Send,
{
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        if self.framing.is_some() {
            debug!(status = status.as_u16(), "superfluous write_head ignored");
            return Ok(());
        }

        let framing = self.choose_framing(status);
        if framing == Framing::CloseDelimited {
            self.keep_alive = false;
        }

        let mut head = BytesMut::with_capacity(128 + self.headers.len() * 64);
        head.extend_from_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                status.as_u16(),
                status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            head.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if framing == Framing::Chunked {
            head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
        }
        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        head.extend_from_slice(format!("Connection: {connection}\r\n\r\n").as_bytes());

        self.stream.write_all(&head).await?;
        self.framing = Some(framing);
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.framing.is_none() {
            self.write_head(StatusCode::OK).await?;
        }
        if chunk.is_empty() {
            return Ok(());
        }
        match self.framing {
            Some(Framing::Chunked) => {
                self.stream
                    .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                    .await?;
                self.stream.write_all(chunk).await?;
                self.stream.write_all(b"\r\n").await
            }
            Some(Framing::Fixed { remaining }) => {
                let len = chunk.len() as u64;
                if len > remaining {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "body exceeds declared Content-Length",
                    ));
                }
                self.framing = Some(Framing::Fixed {
                    remaining: remaining - len,
                });
                self.stream.write_all(chunk).await
            }
            Some(Framing::CloseDelimited) => self.stream.write_all(chunk).await,
            Some(Framing::Empty) | None => Ok(()),
        }
    }
}

/// A [`ResponseWriter`] that collects everything into a [`Response`].
#[derive(Debug, Default)]
pub struct BufferedWriter {
    status: Option<StatusCode>,
    headers: Headers,
    body: BytesMut,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first status written, if any.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Converts the collected parts into a [`Response`], defaulting to `200 OK`.
    pub fn into_response(self) -> Response {
        Response::from_parts(
            self.status.unwrap_or(StatusCode::OK),
            self.headers,
            self.body.freeze(),
        )
    }
}

#[async_trait]
impl ResponseWriter for BufferedWriter {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    async fn write_head(&mut self, status: StatusCode) -> io::Result<()> {
        self.status.get_or_insert(status);
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(chunk);
        Ok(())
    }
}
