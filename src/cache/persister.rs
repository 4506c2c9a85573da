//! Background persistence of captured responses.
//!
//! Store writes never sit on the request path. The interceptor hands a job to
//! [`PersistHandle::submit`], which only enqueues; a fixed pool of worker tasks
//! drains the queue and calls [`CacheStore::put`]. A full queue drops the job,
//! and a failed write is logged and forgotten.
//!
//! Jobs for the same key coalesce while they wait: a newer payload replaces
//! the queued one. Once a worker picks a job up the key is free again, so a
//! submission made during the write is queued behind it and lands last.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::CacheStore;

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersisterConfig {
    /// Number of concurrent writer tasks.
    pub workers: usize,
    /// Jobs that may wait for a worker before new ones are dropped.
    #[serde(alias = "queuecapacity")]
    pub queue_capacity: usize,
}

impl Default for PersisterConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// What [`Persister::shutdown`] does with jobs still in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Write every queued job before returning.
    Drain,
    /// Drop queued jobs; writes already in progress still finish.
    Discard,
}

/// Counters since the persister was spawned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersisterStats {
    pub submitted: u64,
    pub written: u64,
    pub failed: u64,
    /// Rejected at submit time (queue full or closed) or discarded at shutdown.
    pub dropped: u64,
    /// Folded into a queued write for the same key.
    pub deduplicated: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    deduplicated: AtomicU64,
}

struct Shared {
    tx: RwLock<Option<mpsc::Sender<String>>>,
    /// Payloads of queued jobs; the channel carries only their keys.
    pending: Mutex<HashMap<String, Vec<u8>>>,
    discard: AtomicBool,
    counters: Counters,
}

impl Shared {
    fn take(&self, key: &str) -> Option<Vec<u8>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    fn stats(&self) -> PersisterStats {
        let c = &self.counters;
        PersisterStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            deduplicated: c.deduplicated.load(Ordering::Relaxed),
        }
    }
}

/// Owner of the worker pool. Dropping it without [`shutdown`](Self::shutdown)
/// leaves the workers running until every [`PersistHandle`] is gone.
pub struct Persister {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

/// Cheap, cloneable submission side of a [`Persister`].
#[derive(Clone)]
pub struct PersistHandle {
    shared: Arc<Shared>,
}

impl Persister {
    /// Starts `config.workers` writer tasks on the current runtime.
    ///
    /// Zero values in `config` are raised to one.
    pub fn spawn(store: Arc<dyn CacheStore>, config: PersisterConfig) -> Self {
        let workers = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel::<String>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let shared = Arc::new(Shared {
            tx: RwLock::new(Some(tx)),
            pending: Mutex::new(HashMap::new()),
            discard: AtomicBool::new(false),
            counters: Counters::default(),
        });

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_task(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&store),
                    Arc::clone(&shared),
                ))
            })
            .collect();

        info!(workers, queue_capacity = capacity, "cache persister started");
        Self {
            shared,
            workers: handles,
        }
    }

    pub fn handle(&self) -> PersistHandle {
        PersistHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn stats(&self) -> PersisterStats {
        self.shared.stats()
    }

    /// Closes the queue and waits for every worker to exit.
    ///
    /// Submissions made after this call are dropped.
    pub async fn shutdown(self, mode: ShutdownMode) -> PersisterStats {
        if mode == ShutdownMode::Discard {
            self.shared.discard.store(true, Ordering::SeqCst);
        }
        // Dropping the only sender lets workers see the end of the queue.
        self.shared
            .tx
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "cache persister worker panicked");
            }
        }

        let stats = self.shared.stats();
        info!(
            ?mode,
            written = stats.written,
            failed = stats.failed,
            dropped = stats.dropped,
            "cache persister stopped"
        );
        stats
    }
}

impl PersistHandle {
    /// Queues a write of `payload` under `key` without waiting.
    ///
    /// Returns `false` when the job was not queued because the queue is full
    /// or the persister is shutting down. If a job for `key` is still queued,
    /// its payload is replaced and this returns `true`.
    pub fn submit(&self, key: String, payload: Vec<u8>) -> bool {
        let shared = &self.shared;
        shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        // Held across `try_send` so a coalescing submit never races a failed enqueue.
        let mut pending = shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queued) = pending.get_mut(&key) {
            *queued = payload;
            shared.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            debug!(%key, "cache write already queued, payload replaced");
            return true;
        }

        let result = {
            let tx = shared.tx.read().unwrap_or_else(PoisonError::into_inner);
            match tx.as_ref() {
                Some(tx) => tx.try_send(key.clone()).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "persister closed",
                }),
                None => Err("persister closed"),
            }
        };

        match result {
            Ok(()) => {
                pending.insert(key, payload);
                true
            }
            Err(reason) => {
                drop(pending);
                shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(%key, reason, "dropping cache write");
                false
            }
        }
    }

    pub fn stats(&self) -> PersisterStats {
        self.shared.stats()
    }
}

async fn worker_task(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<String>>>,
    store: Arc<dyn CacheStore>,
    shared: Arc<Shared>,
) {
    loop {
        let key = {
            let mut rx = rx.lock().await;
            match rx.recv().await {
                Some(key) => key,
                None => break,
            }
        };

        // Releases the key: later submits for it queue a fresh job.
        let Some(payload) = shared.take(&key) else {
            continue;
        };

        if shared.discard.load(Ordering::SeqCst) {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let bytes = payload.len();
        match store.put(&key, payload).await {
            Ok(()) => {
                shared.counters.written.fetch_add(1, Ordering::Relaxed);
                debug!(worker = id, %key, bytes, "cache entry written");
            }
            Err(e) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(worker = id, %key, error = %e, "cache write failed");
            }
        }
    }
    debug!(worker = id, "cache persister worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Blocks every `put` until released, so tests control queue occupancy.
    struct GatedStore {
        inner: MemoryStore,
        gate: Notify,
        open: AtomicBool,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                gate: Notify::new(),
                open: AtomicBool::new(false),
            }
        }

        fn open(&self) {
            self.open.store(true, Ordering::SeqCst);
            self.gate.notify_waiters();
        }
    }

    #[async_trait]
    impl CacheStore for GatedStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            while !self.open.load(Ordering::SeqCst) {
                let notified = self.gate.notified();
                if self.open.load(Ordering::SeqCst) {
                    break;
                }
                notified.await;
            }
            self.inner.put(key, value).await
        }
    }

    /// Every `put` takes a while, so a submit can land mid-write.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl CacheStore for SlowStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(key, value).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::other("disk on fire")))
        }
    }

    fn config(workers: usize, queue_capacity: usize) -> PersisterConfig {
        PersisterConfig {
            workers,
            queue_capacity,
        }
    }

    #[tokio::test]
    async fn drain_writes_every_queued_job() {
        let store = Arc::new(MemoryStore::new());
        let persister = Persister::spawn(store.clone(), config(2, 16));
        let handle = persister.handle();

        for i in 0..10 {
            assert!(handle.submit(format!("k{i}"), vec![i]));
        }
        let stats = persister.shutdown(ShutdownMode::Drain).await;

        assert_eq!(stats.written, 10);
        assert_eq!(store.len().await, 10);
        assert_eq!(store.get("k3").await.unwrap(), Some(vec![3]));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let store = Arc::new(GatedStore::new());
        let persister = Persister::spawn(store.clone(), config(1, 1));
        let handle = persister.handle();

        // One job is taken by the blocked worker, one fills the queue.
        assert!(handle.submit("a".into(), vec![1]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.submit("b".into(), vec![2]));
        assert!(!handle.submit("c".into(), vec![3]));
        assert_eq!(handle.stats().dropped, 1);

        store.open();
        let stats = persister.shutdown(ShutdownMode::Drain).await;
        assert_eq!(stats.written, 2);
        assert_eq!(store.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn queued_key_keeps_newest_payload() {
        let store = Arc::new(GatedStore::new());
        let persister = Persister::spawn(store.clone(), config(1, 8));
        let handle = persister.handle();

        // Occupy the only worker so the next jobs stay queued.
        assert!(handle.submit("busy".into(), vec![0]));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.submit("same".into(), vec![1]));
        assert!(handle.submit("same".into(), vec![2]));
        assert_eq!(handle.stats().deduplicated, 1);

        store.open();
        let stats = persister.shutdown(ShutdownMode::Drain).await;
        assert_eq!(stats.written, 2);
        assert_eq!(store.get("same").await.unwrap(), Some(vec![2]));
    }

    #[tokio::test]
    async fn submit_during_write_is_not_lost() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(100),
        });
        let persister = Persister::spawn(store.clone(), config(1, 8));
        let handle = persister.handle();

        assert!(handle.submit("k".into(), b"old".to_vec()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.submit("k".into(), b"new".to_vec()));

        let stats = persister.shutdown(ShutdownMode::Drain).await;
        assert_eq!(stats.written, 2);
        assert_eq!(stats.deduplicated, 0);
        assert_eq!(store.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn discard_drops_queued_jobs() {
        let store = Arc::new(GatedStore::new());
        let persister = Persister::spawn(store.clone(), config(1, 8));
        let handle = persister.handle();

        assert!(handle.submit("first".into(), vec![1]));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.submit("second".into(), vec![2]));
        assert!(handle.submit("third".into(), vec![3]));

        let shutdown = tokio::spawn(persister.shutdown(ShutdownMode::Discard));
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.open();
        let stats = shutdown.await.unwrap();

        assert_eq!(stats.written, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(store.get("first").await.unwrap(), Some(vec![1]));
        assert_eq!(store.get("second").await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_writes_are_counted_not_retried() {
        let persister = Persister::spawn(Arc::new(FailingStore), config(1, 8));
        let handle = persister.handle();
        assert!(handle.submit("k".into(), vec![1]));
        let stats = persister.shutdown(ShutdownMode::Drain).await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.written, 0);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let persister = Persister::spawn(Arc::new(MemoryStore::new()), PersisterConfig::default());
        let handle = persister.handle();
        persister.shutdown(ShutdownMode::Drain).await;
        assert!(!handle.submit("late".into(), vec![1]));
        assert_eq!(handle.stats().dropped, 1);
    }
}
