//! Mirrors cache store activity into the metadata repository.
//!
//! Every operation is best-effort. A failed repository call is logged,
//! counted and dropped; the cached value is unaffected.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, warn};

use super::repos::{CacheEntriesRepo, RepoError, UpsertCacheEntryParams};

const SOURCE: &str = "application::tracker";

/// Facts about a value that was just written to the cache store.
#[derive(Debug, Clone)]
pub struct TrackedWrite {
    pub cache_key: String,
    pub request_url: String,
    pub http_method: String,
    pub data_size: i64,
    pub expires_at: OffsetDateTime,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Default)]
pub struct CacheTracker {
    repo: Option<Arc<dyn CacheEntriesRepo>>,
}

impl CacheTracker {
    pub fn new(repo: Arc<dyn CacheEntriesRepo>) -> Self {
        Self { repo: Some(repo) }
    }

    /// A tracker that records nothing.
    pub fn disabled() -> Self {
        Self { repo: None }
    }

    pub async fn on_write(&self, write: TrackedWrite) {
        let Some(repo) = &self.repo else {
            return;
        };
        let key = write.cache_key.clone();
        let params = UpsertCacheEntryParams {
            cache_key: write.cache_key,
            request_url: write.request_url,
            http_method: write.http_method,
            data_size: write.data_size.max(0),
            expires_at: write.expires_at,
            user_id: write.user_id,
            correlation_id: write.correlation_id,
            now: OffsetDateTime::now_utc(),
        };
        match repo.upsert_entry(params).await {
            Ok(record) => debug!(
                target_module = SOURCE,
                key = %record.cache_key,
                size = record.data_size,
                "Tracked cache write"
            ),
            Err(err) => report("write", &key, &err),
        }
    }

    pub async fn on_hit(&self, cache_key: &str) {
        let Some(repo) = &self.repo else {
            return;
        };
        match repo.record_hit(cache_key, OffsetDateTime::now_utc()).await {
            Ok(true) => {}
            Ok(false) => debug!(
                target_module = SOURCE,
                key = cache_key,
                "Cache hit has no metadata row"
            ),
            Err(err) => report("hit", cache_key, &err),
        }
    }

    pub async fn on_remove(&self, cache_key: &str) {
        let Some(repo) = &self.repo else {
            return;
        };
        if let Err(err) = repo.delete_by_key(cache_key).await {
            report("remove", cache_key, &err);
        }
    }
}

fn report(op: &'static str, key: &str, err: &RepoError) {
    metrics::counter!("aside_metadata_track_error_total", "op" => op).increment(1);
    warn!(
        target_module = SOURCE,
        op,
        key,
        error = %err,
        "Failed to update cache metadata"
    );
}
