//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::entities::CacheEntryRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Predicate over metadata rows. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct CacheEntryFilter {
    pub key_prefix: Option<String>,
    pub key_contains: Option<String>,
    pub http_method: Option<String>,
    pub user_id: Option<String>,
}

impl CacheEntryFilter {
    pub fn key_prefix(prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &CacheEntryRecord) -> bool {
        self.key_prefix
            .as_deref()
            .is_none_or(|prefix| record.cache_key.starts_with(prefix))
            && self
                .key_contains
                .as_deref()
                .is_none_or(|needle| record.cache_key.contains(needle))
            && self
                .http_method
                .as_deref()
                .is_none_or(|method| record.http_method.eq_ignore_ascii_case(method))
            && self
                .user_id
                .as_deref()
                .is_none_or(|user| record.user_id.as_deref() == Some(user))
    }
}

/// Values written on every successful cache store for a key.
#[derive(Debug, Clone)]
pub struct UpsertCacheEntryParams {
    pub cache_key: String,
    pub request_url: String,
    pub http_method: String,
    pub data_size: i64,
    pub expires_at: OffsetDateTime,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
    pub now: OffsetDateTime,
}

#[async_trait]
pub trait CacheEntriesRepo: Send + Sync {
    async fn find_by_key(&self, cache_key: &str) -> Result<Option<CacheEntryRecord>, RepoError>;

    /// Rows owned by `user_id`, most recently accessed first.
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<CacheEntryRecord>, RepoError>;

    /// Rows written under `correlation_id`, most recently cached first.
    async fn list_by_correlation(
        &self,
        correlation_id: &str,
    ) -> Result<Vec<CacheEntryRecord>, RepoError>;

    /// Highest hit counts first; ties go to the most recently accessed row.
    async fn list_top_hits(&self, limit: u32) -> Result<Vec<CacheEntryRecord>, RepoError>;

    async fn count_entries(&self) -> Result<u64, RepoError>;

    async fn find_entries(
        &self,
        filter: &CacheEntryFilter,
    ) -> Result<Vec<CacheEntryRecord>, RepoError>;

    /// Insert a row with a zero hit count, or refresh size, expiry and
    /// last-accessed on the existing row for the same key.
    async fn upsert_entry(
        &self,
        params: UpsertCacheEntryParams,
    ) -> Result<CacheEntryRecord, RepoError>;

    /// Add exactly one hit. Returns false when no row exists for the key.
    async fn record_hit(&self, cache_key: &str, at: OffsetDateTime) -> Result<bool, RepoError>;

    /// Returns false when no row existed.
    async fn delete_by_key(&self, cache_key: &str) -> Result<bool, RepoError>;

    /// Delete every row whose `expires_at` is strictly before `now`.
    async fn delete_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}
