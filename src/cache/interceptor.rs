//! The per-request decision engine.

use std::fmt;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::entry::CachedResponse;
use super::key::RequestKeys;
use super::persister::PersistHandle;
use super::policy::is_cacheable;
use super::store::CacheStore;
use crate::config::CacheConfig;
use crate::http::{Request, ResponseCapture, ResponseWriter};
use crate::middleware::Handler;

/// Bypass header value that skips the cache entirely.
pub const BYPASS_VALUE: &str = "no-cache";

/// The path a request took through [`EmergencyCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Bypass header present; forwarded with no store access.
    Bypass,
    /// Replayed from the full key.
    EmergencyLookup,
    /// Replayed from the query-stripped key.
    EmergencyLookupNoQuery,
    /// Nothing stored; forwarded without write-back.
    EmergencyMissForward,
    /// Forwarded; the response was not eligible for storage.
    NormalForward,
    /// Forwarded and queued for storage.
    NormalForwardAndStore,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Bypass => "bypass",
            Decision::EmergencyLookup => "emergency-lookup",
            Decision::EmergencyLookupNoQuery => "emergency-lookup-no-query",
            Decision::EmergencyMissForward => "emergency-miss-forward",
            Decision::NormalForward => "normal-forward",
            Decision::NormalForwardAndStore => "normal-forward-and-store",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching interceptor in front of `next`.
///
/// In normal mode every request goes to `next`; eligible responses are
/// captured on the way back and handed to the persister. In emergency mode
/// the store answers when it can and `next` is only called on a miss.
pub struct EmergencyCache<H> {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    persister: PersistHandle,
    next: H,
}

impl<H: Handler> EmergencyCache<H> {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        persister: PersistHandle,
        next: H,
    ) -> Self {
        Self {
            config,
            store,
            persister,
            next,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Handles `request` and reports which path it took.
    pub async fn handle(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
    ) -> io::Result<Decision> {
        self.dispatch(request, writer)
            .await
            .map(|(decision, _)| decision)
    }

    /// Like [`handle`](Self::handle), also returning the keys unless bypassed.
    async fn dispatch(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
    ) -> io::Result<(Decision, Option<RequestKeys>)> {
        let bypass = request
            .headers()
            .get(&self.config.bypass_header)
            .is_some_and(|value| value == BYPASS_VALUE);
        if bypass {
            self.next.serve(request, writer).await?;
            return Ok((Decision::Bypass, None));
        }

        let keys = RequestKeys::for_request(&request);
        let decision = if self.config.emergency_mode {
            self.serve_emergency(request, writer, &keys).await?
        } else {
            self.serve_normal(request, writer, &keys).await?
        };
        Ok((decision, Some(keys)))
    }

    async fn serve_emergency(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
        keys: &RequestKeys,
    ) -> io::Result<Decision> {
        if let Some(entry) = self.lookup(&keys.full).await {
            if let Some(response) = entry.into_response() {
                response.write_to(writer).await?;
                return Ok(Decision::EmergencyLookup);
            }
        }

        if keys.has_fallback() {
            if let Some(entry) = self.lookup(&keys.stripped).await {
                if let Some(response) = entry.into_response() {
                    response.write_to(writer).await?;
                    return Ok(Decision::EmergencyLookupNoQuery);
                }
            }
        }

        self.next.serve(request, writer).await?;
        Ok(Decision::EmergencyMissForward)
    }

    async fn serve_normal(
        &self,
        request: Request,
        writer: &mut dyn ResponseWriter,
        keys: &RequestKeys,
    ) -> io::Result<Decision> {
        let path = request.path().to_owned();

        let mut capture = ResponseCapture::new(writer);
        self.next.serve(request, &mut capture).await?;

        let marker = capture
            .headers()
            .get(&self.config.cacheable_header)
            .unwrap_or_default()
            .to_owned();
        let headers = capture.headers().clone();
        let (status, body) = capture.into_parts();

        let Some(status) = status else {
            return Ok(Decision::NormalForward);
        };
        if !is_cacheable(&path, status.as_u16(), &marker) {
            return Ok(Decision::NormalForward);
        }

        let payload = match CachedResponse::capture(status, headers, body).encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %keys.full, error = %e, "skipping cache write");
                return Ok(Decision::NormalForward);
            }
        };
        self.persister.submit(keys.full.clone(), payload);
        Ok(Decision::NormalForwardAndStore)
    }

    /// Reads and decodes `key`. Every failure is a miss.
    async fn lookup(&self, key: &str) -> Option<CachedResponse> {
        let payload = match self.store.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                warn!(%key, error = %e, "cache read failed");
                return None;
            }
        };

        match CachedResponse::decode(&payload) {
            Ok(entry) if entry.is_replayable() => Some(entry),
            Ok(entry) => {
                if self.config.debug {
                    debug!(%key, status = entry.status, "ignoring non-200 cache entry");
                }
                None
            }
            Err(e) => {
                warn!(%key, error = %e, "unreadable cache entry");
                None
            }
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for EmergencyCache<H> {
    async fn serve(&self, request: Request, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        if !self.config.debug {
            return self.handle(request, writer).await.map(drop);
        }

        let method = request.method().to_string();
        match self.dispatch(request, writer).await? {
            (decision, Some(keys)) => debug!(
                %decision,
                emergency_mode = self.config.emergency_mode,
                %method,
                key = %keys.full,
                stripped_key = %keys.stripped,
                "cache decision"
            ),
            (decision, None) => debug!(
                %decision,
                emergency_mode = self.config.emergency_mode,
                %method,
                "cache decision"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::persister::{Persister, PersisterConfig, ShutdownMode};
    use crate::cache::store::MemoryStore;
    use crate::http::{BufferedWriter, Method, Response, StatusCode};
    use crate::middleware::handler_fn;

    fn cache(persister: &Persister) -> EmergencyCache<impl Handler + use<>> {
        EmergencyCache::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new()),
            persister.handle(),
            handler_fn(|_req| async { Response::new(StatusCode::OK).body("hi") }),
        )
    }

    #[tokio::test]
    async fn dispatch_returns_keys_it_derived() {
        let persister = Persister::spawn(Arc::new(MemoryStore::new()), PersisterConfig::default());
        let cache = cache(&persister);

        let request = Request::builder(Method::Get, "/page?id=7")
            .header("Host", "site.example")
            .build();
        let (decision, keys) = cache
            .dispatch(request, &mut BufferedWriter::new())
            .await
            .unwrap();
        assert_eq!(decision, Decision::NormalForward);
        let keys = keys.unwrap();
        assert_eq!(keys.full, "site.example/page?id=7");
        assert_eq!(keys.stripped, "site.example/page");

        let request = Request::builder(Method::Get, "/page")
            .header("Host", "site.example")
            .header("X-Emergency-Cache-Control", BYPASS_VALUE)
            .build();
        let (decision, keys) = cache
            .dispatch(request, &mut BufferedWriter::new())
            .await
            .unwrap();
        assert_eq!(decision, Decision::Bypass);
        assert!(keys.is_none());

        persister.shutdown(ShutdownMode::Drain).await;
    }

    #[test]
    fn decisions_have_stable_names() {
        assert_eq!(Decision::Bypass.to_string(), "bypass");
        assert_eq!(
            Decision::EmergencyLookupNoQuery.to_string(),
            "emergency-lookup-no-query"
        );
    }
}
