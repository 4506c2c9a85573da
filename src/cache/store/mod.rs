//! Blob store backends.
//!
//! The decision engine only ever calls [`CacheStore::get`] and
//! [`CacheStore::put`]. Keys are encoded with [`encode_key`] before they are
//! used as a path segment or file name, so every backend sees the same
//! URL-safe, padded base64 names.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use thiserror::Error;


mod file;
mod memory;
mod remote;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use remote::RemoteStore;

/// Errors produced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store request failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("store rejected write with status {0}")]
    Rejected(reqwest::StatusCode),

    #[error("invalid store location `{location}`: {reason}")]
    InvalidLocation { location: String, reason: String },
}

/// A key/value blob store.
///
/// Implementations must tolerate concurrent `get`/`put` calls from many tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetches the payload stored under `key`. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Stores `value` under `key`, replacing any previous payload.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        (**self).put(key, value).await
    }
}

/// Encodes a cache key as a store-addressable name.
///
/// ```
/// use emergency_cache::cache::store::encode_key;
///
/// assert_eq!(encode_key("a.com/x?y=1"), "YS5jb20veD95PTE=");
/// ```
pub fn encode_key(key: &str) -> String {
    URL_SAFE.encode(key.as_bytes())
}

/// Opens the backend named by `location`.
///
/// - `http://…` or `https://…` — [`RemoteStore`]
/// - `memory:` — [`MemoryStore`]
/// - anything else — [`FileStore`] rooted at that directory
///
/// # Errors
///
/// [`StoreError::InvalidLocation`] for an empty location, an unparsable URL,
/// or an unsupported scheme such as `ftp`.
pub fn open_store(location: &str) -> Result<Arc<dyn CacheStore>, StoreError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(StoreError::InvalidLocation {
            location: location.to_owned(),
            reason: "no store path configured".to_owned(),
        });
    }
    if location == "memory:" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if location.contains("://") {
        return Ok(Arc::new(RemoteStore::new(location)?));
    }
    Ok(Arc::new(FileStore::new(location)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_url_safe_and_padded() {
        // Standard base64 would give `Pz8/Pj4+`.
        assert_eq!(encode_key("???>>>"), "Pz8_Pj4-");
        assert_eq!(encode_key("a"), "YQ==");
    }

    #[test]
    fn open_store_picks_backend() {
        assert!(open_store("").is_err());
        assert!(open_store("ftp://store.example/cache").is_err());
        assert!(open_store("https://store.example/cache").is_ok());
        assert!(open_store("http://127.0.0.1:9000/cache").is_ok());
        assert!(open_store("memory:").is_ok());
        assert!(open_store("/var/cache/emergency").is_ok());
    }
}
