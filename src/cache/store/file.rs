//! Local filesystem store: one file per encoded key.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::{CacheStore, StoreError, encode_key};

/// Longest file name segment we emit; longer encoded keys are split into
/// nested directories.
const MAX_SEGMENT_LEN: usize = 200;

/// Stores entries as files under a root directory.
///
/// Writes land in a temporary sibling first and are renamed into place, so a
/// concurrent reader sees either the old payload or the new one.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tmp_counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let encoded = encode_key(key);
        let mut path = self.root.clone();
        // base64 output is ASCII, so byte chunks are valid UTF-8.
        for segment in encoded.as_bytes().chunks(MAX_SEGMENT_LEN) {
            path.push(String::from_utf8_lossy(segment).into_owned());
        }
        path
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.entry_path(key);
        let parent = path.parent().unwrap_or(self.root.as_path()).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        let seq = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = parent.join(format!(".tmp-{}-{seq}", std::process::id()));
        tokio::fs::write(&tmp, &value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "emergency-cache-file-store-{}-{name}",
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = scratch_dir("put-get");
        let store = FileStore::new(&dir);

        assert_eq!(store.get("a.com/x").await.unwrap(), None);
        store.put("a.com/x", b"one".to_vec()).await.unwrap();
        store.put("a.com/x", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("a.com/x").await.unwrap(), Some(b"two".to_vec()));
        assert!(dir.join("YS5jb20veA==").is_file());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn long_keys_are_split_into_directories() {
        let dir = scratch_dir("long");
        let store = FileStore::new(&dir);
        let key = format!("a.com/{}", "p".repeat(400));

        store.put(&key, b"deep".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"deep".to_vec()));

        let path = store.entry_path(&key);
        assert!(path.components().count() > dir.components().count() + 1);

        let _ = std::fs::remove_dir_all(dir);
    }
}
