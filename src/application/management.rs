//! Reporting and invalidation over cached entries.

use std::sync::Arc;

use aside_api_types::{CacheEntryView, CacheStatsResponse, bytes_to_kb};
use tracing::info;

use crate::cache::CacheInterceptor;
use crate::domain::entities::CacheEntryRecord;

use super::repos::{CacheEntriesRepo, CacheEntryFilter, RepoError};

#[derive(Clone)]
pub struct CacheAdminService {
    repo: Arc<dyn CacheEntriesRepo>,
    interceptor: Arc<CacheInterceptor>,
}

impl CacheAdminService {
    pub fn new(repo: Arc<dyn CacheEntriesRepo>, interceptor: Arc<CacheInterceptor>) -> Self {
        Self { repo, interceptor }
    }

    pub async fn stats(&self, top_n: u32) -> Result<CacheStatsResponse, RepoError> {
        let total_cached_requests = self.repo.count_entries().await?;
        let top_hit_requests = self.top_entries(top_n).await?;
        Ok(CacheStatsResponse {
            total_cached_requests,
            top_hit_requests,
        })
    }

    pub async fn top_entries(&self, limit: u32) -> Result<Vec<CacheEntryView>, RepoError> {
        Ok(views(self.repo.list_top_hits(limit).await?))
    }

    pub async fn entries_for_user(&self, user_id: &str) -> Result<Vec<CacheEntryView>, RepoError> {
        Ok(views(self.repo.list_by_user(user_id).await?))
    }

    pub async fn entries_for_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<CacheEntryView>, RepoError> {
        Ok(views(self.repo.list_by_correlation(correlation_id).await?))
    }

    /// Remove one entry from the store and its metadata row.
    pub async fn remove(&self, cache_key: &str) -> bool {
        info!(key = cache_key, "Clearing cache entry");
        self.interceptor.invalidate(cache_key).await
    }

    /// Remove every tracked entry whose key starts with `prefix`.
    ///
    /// Only keys known to the metadata mirror can be found this way.
    pub async fn remove_matching(&self, prefix: &str) -> Result<u64, RepoError> {
        let entries = self
            .repo
            .find_entries(&CacheEntryFilter::key_prefix(prefix))
            .await?;

        let mut removed = 0;
        for entry in entries {
            if self.interceptor.invalidate(&entry.cache_key).await {
                removed += 1;
            }
        }
        info!(prefix, removed, "Cleared cache entries by prefix");
        Ok(removed)
    }
}

fn views(records: Vec<CacheEntryRecord>) -> Vec<CacheEntryView> {
    records.into_iter().map(view).collect()
}

fn view(record: CacheEntryRecord) -> CacheEntryView {
    CacheEntryView {
        data_size_kb: bytes_to_kb(record.data_size),
        cache_key: record.cache_key,
        request_url: record.request_url,
        http_method: record.http_method,
        hit_count: record.hit_count,
        cached_at: record.cached_at,
        last_accessed: record.last_accessed,
        expires_at: record.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::tracker::CacheTracker;
    use crate::cache::{CacheConfig, CacheStore, RequestOrigin};
    use crate::domain::policy::ExpirationPolicy;
    use crate::infra::memory::InMemoryCacheEntries;

    async fn seeded() -> (CacheAdminService, Arc<CacheInterceptor>) {
        let repo = Arc::new(InMemoryCacheEntries::new());
        let interceptor = Arc::new(CacheInterceptor::new(
            CacheStore::in_memory(),
            CacheTracker::new(repo.clone()),
            CacheConfig::default(),
        ));
        let origin = RequestOrigin {
            url: "/api/cache-example/data".to_string(),
            method: "GET".to_string(),
            user_id: Some("u1".to_string()),
            correlation_id: Some("c1".to_string()),
        };
        for key in [
            "cache:CacheExample_GetData_id=1",
            "cache:CacheExample_GetData_id=2",
            "cache:CacheExample_GetTime",
        ] {
            interceptor
                .put(key, &vec![0_u8; 1024], ExpirationPolicy::absolute(5), &origin)
                .await;
        }
        (CacheAdminService::new(repo, interceptor.clone()), interceptor)
    }

    #[tokio::test]
    async fn stats_report_count_and_top_hits() {
        let (service, interceptor) = seeded().await;
        interceptor
            .lookup::<Vec<u8>>("cache:CacheExample_GetTime")
            .await
            .expect("hit");

        let stats = service.stats(2).await.expect("stats");
        assert_eq!(stats.total_cached_requests, 3);
        assert_eq!(stats.top_hit_requests.len(), 2);
        assert_eq!(
            stats.top_hit_requests[0].cache_key,
            "cache:CacheExample_GetTime"
        );
        assert_eq!(stats.top_hit_requests[0].hit_count, 1);
        assert!(stats.top_hit_requests[0].data_size_kb > 1.0);
    }

    #[tokio::test]
    async fn remove_matching_leaves_other_handlers() {
        let (service, interceptor) = seeded().await;

        let removed = service
            .remove_matching("cache:CacheExample_GetData")
            .await
            .expect("remove");

        assert_eq!(removed, 2);
        assert!(
            interceptor
                .store()
                .exists("cache:CacheExample_GetTime")
                .await
        );
        assert!(
            !interceptor
                .store()
                .exists("cache:CacheExample_GetData_id=1")
                .await
        );
        assert_eq!(service.stats(5).await.expect("stats").total_cached_requests, 1);
    }

    #[tokio::test]
    async fn lists_by_owner_and_correlation() {
        let (service, _) = seeded().await;
        assert_eq!(service.entries_for_user("u1").await.expect("user").len(), 3);
        assert!(service.entries_for_user("u2").await.expect("user").is_empty());
        assert_eq!(
            service
                .entries_for_correlation("c1")
                .await
                .expect("correlation")
                .len(),
            3
        );
    }
}
