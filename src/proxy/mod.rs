//! Forwarding to the origin server.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::http::{
    Headers, InvalidStatusCode, Method, Request, Response, ResponseWriter, StatusCode,
    is_hop_by_hop,
};
use crate::middleware::Handler;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced while relaying a request to the origin.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("origin request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error(transparent)]
    Status(#[from] InvalidStatusCode),

    #[error("method `{0}` cannot be forwarded")]
    Method(String),
}

/// Terminal handler that relays each request to a fixed origin.
///
/// Method, path, query, body and end-to-end headers are passed through
/// unchanged, including the client's `Host`. Redirects are returned to the
/// client rather than followed. When the origin cannot be reached the client
/// gets `502 Bad Gateway`.
#[derive(Debug, Clone)]
pub struct Upstream {
    origin: Url,
    client: reqwest::Client,
}

impl Upstream {
    /// # Errors
    ///
    /// [`ProxyError::Request`] if the HTTP client cannot be built.
    pub fn new(origin: Url) -> Result<Self, ProxyError> {
        Self::with_timeout(origin, DEFAULT_TIMEOUT)
    }

    /// Like [`new`](Self::new) with a per-request timeout.
    pub fn with_timeout(origin: Url, timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        Ok(Self { origin, client })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn prepare(&self, request: &Request) -> Result<reqwest::RequestBuilder, ProxyError> {
        let mut url = self.origin.clone();
        url.set_path(request.path());
        url.set_query(request.query_string());

        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| ProxyError::Method(request.method().to_string()))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers().iter() {
            // The client recomputes framing from the body it sends.
            if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            builder = builder.header(name, value);
        }
        if !request.body().is_empty() || request.method().expects_body() {
            builder = builder.body(request.body().clone());
        }
        Ok(builder)
    }

    async fn fetch(&self, request: &Request) -> Result<(StatusCode, Headers, Bytes), ProxyError> {
        let response = self.prepare(request)?.send().await?;
        let status = StatusCode::from_u16(response.status().as_u16())?;
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?;
        Ok((status, headers, body))
    }
}

fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::with_capacity(map.keys_len());
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str(), value);
        }
    }
    headers
}

#[async_trait]
impl Handler for Upstream {
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        let head_only = request.method() == &Method::Head;
        let target = request.target();

        let (status, headers, body) = match self.fetch(&request).await {
            Ok(parts) => parts,
            Err(e) => {
                warn!(origin = %self.origin, %target, error = %e, "origin request failed");
                return Response::new(StatusCode::BAD_GATEWAY)
                    .body("Bad Gateway")
                    .write_to(writer)
                    .await;
            }
        };
        debug!(%target, status = status.as_u16(), "origin responded");

        {
            let out = writer.headers_mut();
            for (name, value) in headers.iter() {
                if is_hop_by_hop(name) {
                    continue;
                }
                // A HEAD response keeps the origin's length; otherwise it is recomputed.
                if !head_only && name.eq_ignore_ascii_case("content-length") {
                    continue;
                }
                out.insert(name, value);
            }
            if !head_only && !status.is_bodiless() {
                out.set("Content-Length", body.len().to_string());
            }
        }

        writer.write_head(status).await?;
        if !body.is_empty() {
            writer.write(&body).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::BufferedWriter;

    #[test]
    fn outgoing_request_keeps_target_and_host() {
        let upstream = Upstream::new(Url::parse("http://10.0.0.5:3000").unwrap()).unwrap();
        let request = Request::builder(Method::Post, "/api/items?page=2")
            .header("Host", "shop.example")
            .header("Connection", "keep-alive")
            .header("X-Trace", "abc")
            .body("{}")
            .build();

        let outgoing = upstream.prepare(&request).unwrap().build().unwrap();
        assert_eq!(outgoing.method(), reqwest::Method::POST);
        assert_eq!(outgoing.url().as_str(), "http://10.0.0.5:3000/api/items?page=2");
        assert_eq!(outgoing.headers()["host"], "shop.example");
        assert_eq!(outgoing.headers()["x-trace"], "abc");
        assert!(!outgoing.headers().contains_key("connection"));
        assert!(!outgoing.headers().contains_key("content-length"));
        assert_eq!(
            outgoing.body().and_then(|b| b.as_bytes()),
            Some(&b"{}"[..])
        );
    }

    #[test]
    fn multi_valued_origin_headers_are_kept() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1".parse().unwrap());
        map.append("set-cookie", "b=2".parse().unwrap());
        map.insert("content-type", "text/html".parse().unwrap());

        let headers = collect_headers(&map);
        assert_eq!(
            headers.get_all("Set-Cookie").collect::<Vec<_>>(),
            vec!["a=1", "b=2"]
        );
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
    }

    #[tokio::test]
    async fn unreachable_origin_is_bad_gateway() {
        // Bind and immediately release a port so nothing is listening on it.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = Upstream::with_timeout(
            Url::parse(&format!("http://{addr}")).unwrap(),
            Duration::from_secs(2),
        )
        .unwrap();
        let mut writer = BufferedWriter::new();
        upstream
            .serve(Request::builder(Method::Get, "/").build(), &mut writer)
            .await
            .unwrap();

        assert_eq!(writer.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
