//! In-process metadata repository.
//!
//! Used when no database is configured and by tests. Ordering and
//! upsert behavior match the Postgres adapter.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    application::repos::{CacheEntriesRepo, CacheEntryFilter, RepoError, UpsertCacheEntryParams},
    domain::entities::CacheEntryRecord,
};

#[derive(Clone, Default)]
pub struct InMemoryCacheEntries {
    rows: Arc<RwLock<HashMap<String, CacheEntryRecord>>>,
}

impl InMemoryCacheEntries {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collect_sorted<F, K>(&self, keep: F, sort_key: K) -> Vec<CacheEntryRecord>
    where
        F: Fn(&CacheEntryRecord) -> bool,
        K: Fn(&CacheEntryRecord, &CacheEntryRecord) -> std::cmp::Ordering,
    {
        let guard = self.rows.read().await;
        let mut rows: Vec<_> = guard.values().filter(|r| keep(r)).cloned().collect();
        rows.sort_by(|a, b| sort_key(a, b));
        rows
    }
}

#[async_trait]
impl CacheEntriesRepo for InMemoryCacheEntries {
    async fn find_by_key(&self, cache_key: &str) -> Result<Option<CacheEntryRecord>, RepoError> {
        Ok(self.rows.read().await.get(cache_key).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(self
            .collect_sorted(
                |r| r.user_id.as_deref() == Some(user_id),
                |a, b| b.last_accessed.cmp(&a.last_accessed),
            )
            .await)
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(self
            .collect_sorted(
                |r| r.correlation_id.as_deref() == Some(correlation_id),
                |a, b| b.cached_at.cmp(&a.cached_at),
            )
            .await)
    }

    async fn list_top_hits(&self, limit: u32) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut rows = self
            .collect_sorted(
                |_| true,
                |a, b| {
                    b.hit_count
                        .cmp(&a.hit_count)
                        .then_with(|| b.last_accessed.cmp(&a.last_accessed))
                },
            )
            .await;
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_entries(&self) -> Result<u64, RepoError> {
        Ok(self.rows.read().await.len() as u64)
    }

    async fn find_entries(
        &self,
        filter: &CacheEntryFilter,
    ) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(self
            .collect_sorted(|r| filter.matches(r), |a, b| a.cache_key.cmp(&b.cache_key))
            .await)
    }

    async fn upsert_entry(
        &self,
        params: UpsertCacheEntryParams,
    ) -> Result<CacheEntryRecord, RepoError> {
        if params.data_size < 0 {
            return Err(RepoError::InvalidInput {
                message: format!("negative data size {}", params.data_size),
            });
        }

        let mut guard = self.rows.write().await;
        let record = guard
            .entry(params.cache_key.clone())
            .and_modify(|row| {
                row.data_size = params.data_size;
                row.expires_at = params.expires_at.max(row.cached_at);
                row.last_accessed = params.now;
            })
            .or_insert_with(|| CacheEntryRecord {
                id: Uuid::new_v4(),
                cache_key: params.cache_key.clone(),
                request_url: params.request_url.clone(),
                http_method: params.http_method.clone(),
                cached_at: params.now,
                last_accessed: params.now,
                data_size: params.data_size,
                hit_count: 0,
                expires_at: params.expires_at.max(params.now),
                user_id: params.user_id.clone(),
                correlation_id: params.correlation_id.clone(),
            });
        Ok(record.clone())
    }

    async fn record_hit(&self, cache_key: &str, at: OffsetDateTime) -> Result<bool, RepoError> {
        let mut guard = self.rows.write().await;
        Ok(guard
            .get_mut(cache_key)
            .map(|row| {
                row.hit_count += 1;
                row.last_accessed = at;
            })
            .is_some())
    }

    async fn delete_by_key(&self, cache_key: &str) -> Result<bool, RepoError> {
        Ok(self.rows.write().await.remove(cache_key).is_some())
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut guard = self.rows.write().await;
        let before = guard.len();
        guard.retain(|_, row| !row.is_expired_at(now));
        Ok((before - guard.len()) as u64)
    }
}
