//! Cache-aside around a single handler invocation.
//!
//! A lookup that hits returns the stored value and records the hit. A miss
//! runs the handler; only a successful, non-empty result is stored and
//! mirrored into metadata. Handler errors pass through untouched.

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::application::tracker::{CacheTracker, TrackedWrite};
use crate::domain::policy::ExpirationPolicy;

use super::config::CacheConfig;
use super::store::{CacheStore, EntryOptions};

/// Whether a response was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub const HEADER: &'static str = "x-cache";

    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "Hit",
            CacheStatus::Miss => "Miss",
        }
    }
}

/// Request facts recorded alongside a cache write.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    pub url: String,
    pub method: String,
    pub user_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// Value returned by [`CacheInterceptor::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: Option<T>,
    pub status: CacheStatus,
}

#[derive(Clone)]
pub struct CacheInterceptor {
    store: CacheStore,
    tracker: CacheTracker,
    config: CacheConfig,
}

impl CacheInterceptor {
    pub fn new(store: CacheStore, tracker: CacheTracker, config: CacheConfig) -> Self {
        Self {
            store,
            tracker,
            config,
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Fill unset lifetimes from configuration.
    pub fn resolve(&self, expiration: ExpirationPolicy) -> ExpirationPolicy {
        expiration.with_defaults(
            self.config.default_absolute_minutes,
            self.config.default_sliding_minutes,
        )
    }

    /// Look up `key`. A hit is recorded in metadata before returning.
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get_json::<T>(key).await {
            Some(value) => {
                metrics::counter!("aside_cache_hit_total").increment(1);
                debug!(key, outcome = "hit", "Serving cached value");
                self.tracker.on_hit(key).await;
                Some(value)
            }
            None => {
                metrics::counter!("aside_cache_miss_total").increment(1);
                debug!(key, outcome = "miss", "Cache miss");
                None
            }
        }
    }

    /// Store `value` under `key` and mirror the write into metadata.
    ///
    /// Returns false when the store rejected the write; metadata is not
    /// touched in that case.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expiration: ExpirationPolicy,
        origin: &RequestOrigin,
    ) -> bool {
        let expiration = self.resolve(expiration);
        let options = EntryOptions::new(expiration.absolute_ttl(), expiration.sliding_ttl());
        let Some(size) = self.store.set_json(key, value, options).await else {
            return false;
        };

        self.tracker
            .on_write(TrackedWrite {
                cache_key: key.to_string(),
                request_url: origin.url.clone(),
                http_method: origin.method.clone(),
                data_size: i64::try_from(size).unwrap_or(i64::MAX),
                expires_at: metadata_expiry(expiration, OffsetDateTime::now_utc()),
                user_id: origin.user_id.clone(),
                correlation_id: origin.correlation_id.clone(),
            })
            .await;
        true
    }

    /// Run `handler` behind the cache.
    ///
    /// `Ok(None)` from the handler is an empty result and is not cached.
    pub async fn invoke<T, E, F, Fut>(
        &self,
        key: &str,
        expiration: ExpirationPolicy,
        origin: &RequestOrigin,
        handler: F,
    ) -> Result<Cached<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        if let Some(value) = self.lookup::<T>(key).await {
            return Ok(Cached {
                value: Some(value),
                status: CacheStatus::Hit,
            });
        }

        let value = handler().await?;
        if let Some(value) = &value {
            self.put(key, value, expiration, origin).await;
        }
        Ok(Cached {
            value,
            status: CacheStatus::Miss,
        })
    }

    /// Drop `key` from the store and its metadata row.
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.store.remove(key).await;
        self.tracker.on_remove(key).await;
        removed
    }
}

/// Expiry recorded in metadata for a value written at `now`.
///
/// Saturates at the largest representable timestamp.
pub fn metadata_expiry(expiration: ExpirationPolicy, now: OffsetDateTime) -> OffsetDateTime {
    let minutes = expiration
        .absolute_minutes
        .or(expiration.sliding_minutes)
        .unwrap_or(0);
    now.checked_add(time::Duration::minutes(i64::from(minutes)))
        .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
}
