//! Postgres metadata repository tests.
//!
//! Need `DATABASE_URL` pointing at a scratch server; run with `cargo test -- --ignored`.

use aside::application::repos::{CacheEntriesRepo, CacheEntryFilter, UpsertCacheEntryParams};
use aside::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

fn params(key: &str, now: OffsetDateTime, ttl_minutes: i64) -> UpsertCacheEntryParams {
    UpsertCacheEntryParams {
        cache_key: key.to_string(),
        request_url: "/api/cache-example/data?id=1".to_string(),
        http_method: "GET".to_string(),
        data_size: 2048,
        expires_at: now + Duration::minutes(ttl_minutes),
        user_id: Some("alice".to_string()),
        correlation_id: Some("corr-1".to_string()),
        now,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn upsert_keeps_identity_and_hit_count(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let now = OffsetDateTime::now_utc();

    let first = repos
        .upsert_entry(params("cache:Items_Get", now, 5))
        .await
        .expect("insert");
    assert!(repos.record_hit("cache:Items_Get", now).await.expect("hit"));
    assert!(repos.record_hit("cache:Items_Get", now).await.expect("hit"));

    let mut again = params("cache:Items_Get", now + Duration::minutes(1), 10);
    again.data_size = 4096;
    let second = repos.upsert_entry(again).await.expect("upsert");

    assert_eq!(second.id, first.id);
    assert_eq!(second.cached_at, first.cached_at);
    assert_eq!(second.hit_count, 2);
    assert_eq!(second.data_size, 4096);
    assert_eq!(repos.count_entries().await.expect("count"), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn hits_on_unknown_keys_are_ignored(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let hit = repos
        .record_hit("cache:missing", OffsetDateTime::now_utc())
        .await
        .expect("hit");
    assert!(!hit);
    assert!(!repos.delete_by_key("cache:missing").await.expect("delete"));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn expired_rows_are_swept_once(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let now = OffsetDateTime::now_utc();

    repos
        .upsert_entry(params("cache:Old_Get", now - Duration::minutes(10), 2))
        .await
        .expect("old");
    repos
        .upsert_entry(params("cache:Fresh_Get", now, 30))
        .await
        .expect("fresh");

    assert_eq!(repos.delete_expired(now).await.expect("sweep"), 1);
    assert_eq!(repos.delete_expired(now).await.expect("sweep"), 0);
    assert!(repos.find_by_key("cache:Old_Get").await.expect("find").is_none());
    assert!(repos.find_by_key("cache:Fresh_Get").await.expect("find").is_some());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn top_hits_and_prefix_filter(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let now = OffsetDateTime::now_utc();

    for key in [
        "cache:Data_Get_id=1",
        "cache:Data_Get_id=2",
        "cache:DataX_Get",
        "cache:Time_Get",
    ] {
        repos.upsert_entry(params(key, now, 5)).await.expect("insert");
    }
    for _ in 0..3 {
        repos.record_hit("cache:Time_Get", now).await.expect("hit");
    }
    repos.record_hit("cache:Data_Get_id=2", now).await.expect("hit");

    let top = repos.list_top_hits(2).await.expect("top");
    let keys: Vec<_> = top.iter().map(|entry| entry.cache_key.as_str()).collect();
    assert_eq!(keys, ["cache:Time_Get", "cache:Data_Get_id=2"]);

    // `_` must not act as a LIKE wildcard
    let data = repos
        .find_entries(&CacheEntryFilter::key_prefix("cache:Data_Get"))
        .await
        .expect("filter");
    assert_eq!(data.len(), 2);

    assert_eq!(repos.list_by_user("alice").await.expect("user").len(), 4);
    assert_eq!(
        repos.list_by_correlation("corr-1").await.expect("corr").len(),
        4
    );
}
