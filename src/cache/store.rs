//! Key-value cache storage.
//!
//! Backends report failures through [`CacheStoreError`]. [`CacheStore`] wraps
//! a backend and turns every failure into a miss or a `false`, logging it
//! and counting it, so callers never see cache I/O errors.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

/// Minimum spacing between full scans for expired in-memory entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache connection failed: {0}")]
    Connection(String),
    #[error("cache command failed: {0}")]
    Backend(String),
    #[error("cache entry is malformed: {0}")]
    Corrupt(String),
}

/// Lifetimes for one stored value.
///
/// `absolute` is a hard ceiling measured from the write. `sliding` is the
/// idle window, renewed by every successful read but never past `absolute`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    pub absolute: Option<Duration>,
    pub sliding: Option<Duration>,
}

impl EntryOptions {
    pub fn new(absolute: Option<Duration>, sliding: Option<Duration>) -> Self {
        Self { absolute, sliding }
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheStoreError>;

    async fn set(&self, key: &str, value: Bytes, options: EntryOptions)
    -> Result<(), CacheStoreError>;

    async fn remove(&self, key: &str) -> Result<(), CacheStoreError>;

    /// Presence check. Does not renew the sliding window.
    async fn exists(&self, key: &str) -> Result<bool, CacheStoreError>;
}

/// Error-swallowing facade over a [`CacheBackend`].
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by process memory with the default capacity.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::default()))
    }

    /// Store backed by process memory holding at most `capacity` entries.
    pub fn in_memory_with_capacity(capacity: NonZeroUsize) -> Self {
        Self::new(Arc::new(MemoryBackend::new(capacity)))
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(err) => {
                self.report("get", key, &err);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Bytes, options: EntryOptions) -> bool {
        match self.backend.set(key, value, options).await {
            Ok(()) => true,
            Err(err) => {
                self.report("set", key, &err);
                false
            }
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        match self.backend.remove(key).await {
            Ok(()) => true,
            Err(err) => {
                self.report("remove", key, &err);
                false
            }
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.exists(key).await {
            Ok(found) => found,
            Err(err) => {
                self.report("exists", key, &err);
                false
            }
        }
    }

    /// Read and decode a JSON value. A payload that fails to decode is a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                metrics::counter!("aside_cache_store_error_total", "op" => "decode").increment(1);
                warn!(
                    target_module = SOURCE,
                    key,
                    error = %err,
                    "Discarding undecodable cache payload"
                );
                None
            }
        }
    }

    /// Encode and store a JSON value. Returns the stored size in bytes.
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: EntryOptions,
    ) -> Option<usize> {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                metrics::counter!("aside_cache_store_error_total", "op" => "encode").increment(1);
                warn!(target_module = SOURCE, key, error = %err, "Failed to encode cache payload");
                return None;
            }
        };
        let size = bytes.len();
        self.set(key, bytes, options).await.then_some(size)
    }

    fn report(&self, op: &'static str, key: &str, err: &CacheStoreError) {
        metrics::counter!("aside_cache_store_error_total", "op" => op).increment(1);
        warn!(
            target_module = SOURCE,
            backend = self.backend.name(),
            op,
            key,
            error = %err,
            "Cache store operation failed"
        );
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Bytes,
    hard_deadline: Option<Instant>,
    sliding: Option<Duration>,
    live_until: Option<Instant>,
}

impl MemoryEntry {
    fn new(data: Bytes, options: EntryOptions, now: Instant) -> Self {
        // A deadline past the clock's range never fires.
        let hard_deadline = options.absolute.and_then(|ttl| now.checked_add(ttl));
        let mut entry = Self {
            data,
            hard_deadline,
            sliding: options.sliding,
            live_until: None,
        };
        entry.renew(now);
        entry
    }

    fn renew(&mut self, now: Instant) {
        let idle = self.sliding.and_then(|idle| now.checked_add(idle));
        self.live_until = match (self.hard_deadline, idle) {
            (Some(hard), Some(idle)) => Some(hard.min(idle)),
            (hard, idle) => hard.or(idle),
        };
    }

    fn is_live(&self, now: Instant) -> bool {
        self.live_until.is_none_or(|until| now < until)
    }
}

#[derive(Debug)]
struct MemoryState {
    entries: LruCache<String, MemoryEntry>,
    next_purge: Instant,
}

impl MemoryState {
    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        self.next_purge = now + PURGE_INTERVAL;
        expired.len()
    }
}

/// In-process backend with the same expiration semantics as Redis.
///
/// Bounded by an LRU capacity. Expired entries are dropped when touched, and
/// writes sweep the whole map at most once a minute.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(super::CacheConfig::default().memory_max_entries_non_zero())
    }
}

impl MemoryBackend {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::new(capacity),
                next_purge: Instant::now() + PURGE_INTERVAL,
            }),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheStoreError> {
        let now = Instant::now();
        let mut state = mutex_lock(&self.state, SOURCE, "get");
        let Some(entry) = state.entries.get_mut(key) else {
            return Ok(None);
        };
        if !entry.is_live(now) {
            state.entries.pop(key);
            return Ok(None);
        }
        entry.renew(now);
        Ok(Some(entry.data.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        options: EntryOptions,
    ) -> Result<(), CacheStoreError> {
        let now = Instant::now();
        let entry = MemoryEntry::new(value, options, now);
        let mut state = mutex_lock(&self.state, SOURCE, "set");
        if now >= state.next_purge {
            let purged = state.purge_expired(now);
            if purged > 0 {
                debug!(target_module = SOURCE, purged, "Purged expired cache entries");
            }
        }
        state.entries.put(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheStoreError> {
        mutex_lock(&self.state, SOURCE, "remove").entries.pop(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheStoreError> {
        let now = Instant::now();
        Ok(mutex_lock(&self.state, SOURCE, "exists")
            .entries
            .peek(key)
            .is_some_and(|entry| entry.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    struct FailingBackend;

    #[async_trait]
    impl CacheBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheStoreError> {
            Err(CacheStoreError::Connection("refused".into()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: Bytes,
            _options: EntryOptions,
        ) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::Connection("refused".into()))
        }

        async fn remove(&self, _key: &str) -> Result<(), CacheStoreError> {
            Err(CacheStoreError::Connection("refused".into()))
        }

        async fn exists(&self, _key: &str) -> Result<bool, CacheStoreError> {
            Err(CacheStoreError::Connection("refused".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get_round_trips() {
        let store = CacheStore::in_memory();
        let options = EntryOptions::new(Some(2 * MINUTE), None);
        assert!(store.set("k", Bytes::from_static(b"v"), options).await);
        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"v")));
        assert!(store.exists("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn absolute_ttl_is_a_hard_ceiling() {
        let store = CacheStore::in_memory();
        let options = EntryOptions::new(Some(2 * MINUTE), Some(MINUTE));
        store.set("k", Bytes::from_static(b"v"), options).await;

        for step in [40, 40, 39] {
            tokio::time::advance(Duration::from_secs(step)).await;
            assert!(store.get("k").await.is_some());
        }
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_window_expires_idle_entries() {
        let store = CacheStore::in_memory();
        let options = EntryOptions::new(Some(10 * MINUTE), Some(5 * MINUTE));
        store.set("k", Bytes::from_static(b"v"), options).await;

        tokio::time::advance(4 * MINUTE).await;
        assert!(store.get("k").await.is_some());
        tokio::time::advance(4 * MINUTE).await;
        assert!(store.get("k").await.is_some());
        tokio::time::advance(6 * MINUTE).await;
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exists_does_not_renew_sliding_window() {
        let store = CacheStore::in_memory();
        store
            .set("k", Bytes::from_static(b"v"), EntryOptions::new(None, Some(MINUTE)))
            .await;

        tokio::time::advance(Duration::from_secs(50)).await;
        assert!(store.exists("k").await);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(!store.exists("k").await);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = CacheStore::in_memory();
        store
            .set("k", Bytes::from_static(b"v"), EntryOptions::default())
            .await;
        assert!(store.remove("k").await);
        assert!(store.remove("k").await);
        assert!(store.get("k").await.is_none());
    }

    #[tokio::test]
    async fn backend_failures_read_as_misses() {
        let store = CacheStore::new(Arc::new(FailingBackend));
        assert!(store.get("k").await.is_none());
        assert!(!store.set("k", Bytes::new(), EntryOptions::default()).await);
        assert!(!store.remove("k").await);
        assert!(!store.exists("k").await);
    }

    #[tokio::test]
    async fn undecodable_json_is_a_miss() {
        let store = CacheStore::in_memory();
        store
            .set("k", Bytes::from_static(b"not json"), EntryOptions::default())
            .await;
        assert_eq!(store.get_json::<Vec<u32>>("k").await, None);

        let size = store
            .set_json("k", &vec![1_u32, 2], EntryOptions::default())
            .await;
        assert_eq!(size, Some(5));
        assert_eq!(store.get_json::<Vec<u32>>("k").await, Some(vec![1, 2]));
    }

    fn held(backend: &MemoryBackend) -> usize {
        mutex_lock(&backend.state, SOURCE, "held").entries.len()
    }

    #[tokio::test(start_paused = true)]
    async fn writes_purge_expired_entries() {
        let backend = MemoryBackend::default();
        let short = EntryOptions::new(Some(Duration::from_secs(1)), None);
        for i in 0..1000 {
            backend
                .set(&format!("k{i}"), Bytes::from_static(b"v"), short)
                .await
                .expect("set");
        }
        assert_eq!(held(&backend), 1000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        backend
            .set("fresh", Bytes::from_static(b"v"), short)
            .await
            .expect("set");
        assert_eq!(held(&backend), 1);
        assert!(backend.exists("fresh").await.expect("exists"));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_runs_at_most_once_per_interval() {
        let backend = MemoryBackend::default();
        let short = EntryOptions::new(Some(Duration::from_secs(1)), None);
        tokio::time::advance(PURGE_INTERVAL).await;
        backend.set("a", Bytes::new(), short).await.expect("set");

        tokio::time::advance(Duration::from_secs(2)).await;
        backend.set("b", Bytes::new(), short).await.expect("set");
        assert_eq!(held(&backend), 2);
        assert!(!backend.exists("a").await.expect("exists"));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let capacity = NonZeroUsize::new(2).expect("non-zero");
        let store = CacheStore::in_memory_with_capacity(capacity);
        let options = EntryOptions::default();
        store.set("a", Bytes::from_static(b"1"), options).await;
        store.set("b", Bytes::from_static(b"2"), options).await;
        assert!(store.get("a").await.is_some());

        store.set("c", Bytes::from_static(b"3"), options).await;
        assert!(store.get("a").await.is_some());
        assert!(store.get("b").await.is_none());
        assert!(store.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_lifetimes_do_not_overflow() {
        let store = CacheStore::in_memory();
        let huge = Duration::from_secs(u64::MAX);
        assert!(
            store
                .set("k", Bytes::from_static(b"v"), EntryOptions::new(Some(huge), Some(huge)))
                .await
        );
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(store.get("k").await.is_some());
    }
}
