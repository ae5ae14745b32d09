//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

/// Persisted facts about one cached response.
///
/// The row mirrors a cache entry for reporting only. Its presence does not
/// mean the cached value is still live in the store, and the store may hold
/// values whose row was never written or has already been swept.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryRecord {
    pub id: Uuid,
    pub cache_key: String,
    pub request_url: String,
    pub http_method: String,
    pub cached_at: OffsetDateTime,
    pub last_accessed: OffsetDateTime,
    pub data_size: i64,
    pub hit_count: i64,
    pub expires_at: OffsetDateTime,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

impl CacheEntryRecord {
    /// Whether the row is due for the expiry sweep at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }
}
