use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aside::application::repos::{
    CacheEntriesRepo, CacheEntryFilter, RepoError, UpsertCacheEntryParams,
};
use aside::application::sweeper::Sweeper;
use aside::application::tracker::CacheTracker;
use aside::cache::{
    CacheBackend, CacheConfig, CacheInterceptor, CacheStatus, CacheStore, CacheStoreError,
    CachedRoute, EntryOptions, cache_aside_layer,
};
use aside::domain::entities::CacheEntryRecord;
use aside::domain::policy::{CachePolicy, ExpirationPolicy};
use aside::infra::memory::InMemoryCacheEntries;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
    middleware,
    routing::get,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use metrics_util::debugging::DebuggingRecorder;
use time::OffsetDateTime;
use tower::ServiceExt;

struct Unreachable;

#[async_trait]
impl CacheBackend for Unreachable {
    fn name(&self) -> &'static str {
        "unreachable"
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

/// Metadata store whose writes, hits and deletes all fail.
struct OfflineRepo;

#[async_trait]
impl CacheEntriesRepo for OfflineRepo {
    async fn find_by_key(&self, _: &str) -> Result<Option<CacheEntryRecord>, RepoError> {
        Ok(None)
    }
    async fn list_by_user(&self, _: &str) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(Vec::new())
    }
    async fn list_by_correlation(&self, _: &str) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(Vec::new())
    }
    async fn list_top_hits(&self, _: u32) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(Vec::new())
    }
    async fn count_entries(&self) -> Result<u64, RepoError> {
        Ok(0)
    }
    async fn find_entries(&self, _: &CacheEntryFilter) -> Result<Vec<CacheEntryRecord>, RepoError> {
        Ok(Vec::new())
    }
    async fn upsert_entry(&self, _: UpsertCacheEntryParams) -> Result<CacheEntryRecord, RepoError> {
        Err(RepoError::Timeout)
    }
    async fn record_hit(&self, _: &str, _: OffsetDateTime) -> Result<bool, RepoError> {
        Err(RepoError::Timeout)
    }
    async fn delete_by_key(&self, _: &str) -> Result<bool, RepoError> {
        Err(RepoError::Timeout)
    }
    async fn delete_expired(&self, _: OffsetDateTime) -> Result<u64, RepoError> {
        Err(RepoError::Timeout)
    }
}

/// Returns the `X-Cache` header and the body.
async fn hit_route(app: &Router, uri: &str) -> (Option<String>, Bytes) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    assert_eq!(response.status(), StatusCode::OK);
    let status = response
        .headers()
        .get(CacheStatus::HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    (status, body)
}

fn interceptor(store: CacheStore, repo: Arc<dyn CacheEntriesRepo>) -> Arc<CacheInterceptor> {
    Arc::new(CacheInterceptor::new(
        store,
        CacheTracker::new(repo),
        CacheConfig::default(),
    ))
}

fn counting_app(interceptor: Arc<CacheInterceptor>, calls: Arc<AtomicUsize>) -> Router {
    let route = CachedRoute::new(interceptor, CachePolicy::new("Items_Get").absolute_minutes(1));
    Router::new().route(
        "/items",
        get(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "items"
            }
        })
        .layer(middleware::from_fn_with_state(route, cache_aside_layer)),
    )
}

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let repo = Arc::new(InMemoryCacheEntries::new());

    // hit + miss through the middleware
    let calls = Arc::new(AtomicUsize::new(0));
    let app = counting_app(
        interceptor(CacheStore::in_memory(), repo.clone()),
        calls.clone(),
    );
    hit_route(&app, "/items").await;
    hit_route(&app, "/items").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // backend failures degrade to misses
    let broken_calls = Arc::new(AtomicUsize::new(0));
    let broken = counting_app(
        interceptor(CacheStore::new(Arc::new(Unreachable)), repo.clone()),
        broken_calls.clone(),
    );
    hit_route(&broken, "/items").await;
    hit_route(&broken, "/items").await;
    assert_eq!(broken_calls.load(Ordering::SeqCst), 2);

    // metadata failures leave caching intact
    let offline_calls = Arc::new(AtomicUsize::new(0));
    let offline = interceptor(CacheStore::in_memory(), Arc::new(OfflineRepo));
    let untracked = counting_app(offline.clone(), offline_calls.clone());
    let (first, first_body) = hit_route(&untracked, "/items").await;
    let (second, second_body) = hit_route(&untracked, "/items").await;
    assert_eq!(first.as_deref(), Some("Miss"));
    assert_eq!(second.as_deref(), Some("Hit"));
    assert_eq!(first_body, second_body);
    assert_eq!(offline_calls.load(Ordering::SeqCst), 1);

    offline
        .put("cache:manual", &7_u32, ExpirationPolicy::absolute(5), &Default::default())
        .await;
    assert!(offline.store().exists("cache:manual").await);
    assert!(offline.invalidate("cache:manual").await);
    assert!(!offline.store().exists("cache:manual").await);

    let sweeper = Sweeper::new(repo, Duration::from_secs(60));
    sweeper.sweep_once().await.expect("sweep");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "aside_cache_hit_total",
        "aside_cache_miss_total",
        "aside_cache_store_error_total",
        "aside_metadata_track_error_total",
        "aside_sweep_removed_total",
        "aside_sweep_ms",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
