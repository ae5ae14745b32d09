use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{
    CacheEntriesRepo, CacheEntryFilter, RepoError, UpsertCacheEntryParams,
};
use crate::domain::entities::CacheEntryRecord;

use super::{PostgresRepositories, map_sqlx_error, row_count};

const COLUMNS: &str = "id, cache_key, request_url, http_method, cached_at, last_accessed, \
    data_size, hit_count, expires_at, user_id, correlation_id";

#[derive(Debug, sqlx::FromRow)]
struct CacheEntryRow {
    id: Uuid,
    cache_key: String,
    request_url: String,
    http_method: String,
    cached_at: OffsetDateTime,
    last_accessed: OffsetDateTime,
    data_size: i64,
    hit_count: i64,
    expires_at: OffsetDateTime,
    user_id: Option<String>,
    correlation_id: Option<String>,
}

impl From<CacheEntryRow> for CacheEntryRecord {
    fn from(row: CacheEntryRow) -> Self {
        Self {
            id: row.id,
            cache_key: row.cache_key,
            request_url: row.request_url,
            http_method: row.http_method,
            cached_at: row.cached_at,
            last_accessed: row.last_accessed,
            data_size: row.data_size,
            hit_count: row.hit_count,
            expires_at: row.expires_at,
            user_id: row.user_id,
            correlation_id: row.correlation_id,
        }
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl PostgresRepositories {
    async fn fetch_entries(
        &self,
        mut qb: QueryBuilder<'_, Postgres>,
    ) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let rows = qb
            .build_query_as::<CacheEntryRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(CacheEntryRecord::from).collect())
    }
}

#[async_trait::async_trait]
impl CacheEntriesRepo for PostgresRepositories {
    async fn find_by_key(&self, cache_key: &str) -> Result<Option<CacheEntryRecord>, RepoError> {
        let row = sqlx::query_as::<_, CacheEntryRow>(&format!(
            "SELECT {COLUMNS} FROM cache_entries WHERE cache_key = $1"
        ))
        .bind(cache_key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(CacheEntryRecord::from))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM cache_entries WHERE user_id = "));
        qb.push_bind(user_id.to_string());
        qb.push(" ORDER BY last_accessed DESC, id DESC");
        self.fetch_entries(qb).await
    }

    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM cache_entries WHERE correlation_id = "
        ));
        qb.push_bind(correlation_id.to_string());
        qb.push(" ORDER BY cached_at DESC, id DESC");
        self.fetch_entries(qb).await
    }

    async fn list_top_hits(&self, limit: u32) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM cache_entries ORDER BY hit_count DESC, last_accessed DESC LIMIT "
        ));
        qb.push_bind(i64::from(limit));
        self.fetch_entries(qb).await
    }

    async fn count_entries(&self) -> Result<u64, RepoError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        row_count(count)
    }

    async fn find_entries(
        &self,
        filter: &CacheEntryFilter,
    ) -> Result<Vec<CacheEntryRecord>, RepoError> {
        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM cache_entries WHERE TRUE"));

        if let Some(prefix) = filter.key_prefix.as_deref() {
            qb.push(" AND cache_key LIKE ");
            qb.push_bind(format!("{}%", escape_like(prefix)));
        }
        if let Some(needle) = filter.key_contains.as_deref() {
            qb.push(" AND cache_key LIKE ");
            qb.push_bind(format!("%{}%", escape_like(needle)));
        }
        if let Some(method) = filter.http_method.as_deref() {
            qb.push(" AND UPPER(http_method) = ");
            qb.push_bind(method.to_ascii_uppercase());
        }
        if let Some(user_id) = filter.user_id.as_deref() {
            qb.push(" AND user_id = ");
            qb.push_bind(user_id.to_string());
        }
        qb.push(" ORDER BY cache_key");

        self.fetch_entries(qb).await
    }

    async fn upsert_entry(
        &self,
        params: UpsertCacheEntryParams,
    ) -> Result<CacheEntryRecord, RepoError> {
        let row = sqlx::query_as::<_, CacheEntryRow>(&format!(
            r#"
            INSERT INTO cache_entries
                (id, cache_key, request_url, http_method, cached_at, last_accessed,
                 data_size, hit_count, expires_at, user_id, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $5, $6, 0, GREATEST($7, $5), $8, $9)
            ON CONFLICT (cache_key) DO UPDATE SET
                data_size = EXCLUDED.data_size,
                expires_at = GREATEST(EXCLUDED.expires_at, cache_entries.cached_at),
                last_accessed = EXCLUDED.last_accessed
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&params.cache_key)
        .bind(&params.request_url)
        .bind(&params.http_method)
        .bind(params.now)
        .bind(params.data_size)
        .bind(params.expires_at)
        .bind(&params.user_id)
        .bind(&params.correlation_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn record_hit(&self, cache_key: &str, at: OffsetDateTime) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed = $2 \
             WHERE cache_key = $1",
        )
        .bind(cache_key)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_by_key(&self, cache_key: &str) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(cache_key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at < $1")
            .bind(now)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
