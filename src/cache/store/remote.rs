//! Remote HTTP blob store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;
use url::Url;

use super::{CacheStore, StoreError, encode_key};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A blob store spoken to over HTTP or HTTPS.
///
/// Entries live at `<base>/<encoded key>`: `GET` returning `200` is a hit and
/// any other status a miss; `PUT` stores the payload as the request body.
#[derive(Debug, Clone)]
pub struct RemoteStore {
    base: Url,
    client: Client,
}

impl RemoteStore {
    /// Creates a store rooted at `location` (e.g. `https://blobs:8443/cache`).
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidLocation`] if `location` is not an `http` or
    /// `https` URL with a host; [`StoreError::Client`] if the HTTP client
    /// cannot be built.
    pub fn new(location: &str) -> Result<Self, StoreError> {
        let invalid = |reason: String| StoreError::InvalidLocation {
            location: location.to_owned(),
            reason,
        };

        // Always address entries relative to a directory-like base.
        let normalized = format!("{}/", location.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|e| invalid(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", base.scheme())));
        }
        if base.host_str().is_none() {
            return Err(invalid("missing host".to_owned()));
        }

        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self { base, client })
    }

    /// Swaps in a preconfigured client (timeouts, TLS roots, proxies).
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn entry_url(&self, key: &str) -> Result<Url, StoreError> {
        self.base
            .join(&encode_key(key))
            .map_err(|e| StoreError::InvalidLocation {
                location: self.base.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl CacheStore for RemoteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let response = self.client.get(self.entry_url(key)?).send().await?;
        if response.status() != StatusCode::OK {
            debug!(key, status = response.status().as_u16(), "store miss");
            return Ok(None);
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let response = self
            .client
            .put(self.entry_url(key)?)
            .body(value)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(StoreError::Rejected(response.status()));
        }
        Ok(())
    }
}
