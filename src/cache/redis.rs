//! Redis cache backend.
//!
//! Each entry is a hash with three fields:
//!
//! - `absexp`: absolute deadline as unix epoch milliseconds, `-1` when unset
//! - `sldexp`: sliding window in milliseconds, `-1` when unset
//! - `data`: the opaque payload
//!
//! The key's `PEXPIRE` always equals the current live window, so Redis drops
//! entries on its own. Reads renew the window when a sliding lifetime is set.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use time::OffsetDateTime;
use tracing::debug;

use super::store::{CacheBackend, CacheStoreError, EntryOptions};

const ABSENT: i64 = -1;

#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
    instance_prefix: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("instance_prefix", &self.instance_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    pub async fn connect(url: &str, instance_prefix: &str) -> Result<Self, CacheStoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheStoreError::Connection(format!("invalid redis url: {e}")))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheStoreError::Connection(e.to_string()))?;

        debug!(url = %redact_url(url), instance_prefix, "Redis cache backend connected");

        Ok(Self {
            manager,
            instance_prefix: instance_prefix.to_string(),
        })
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{key}", self.instance_prefix)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheStoreError> {
        let key = self.namespaced(key);
        let mut conn = self.manager.clone();

        let (absexp, sldexp, data): (Option<i64>, Option<i64>, Option<Vec<u8>>) =
            redis::cmd("HMGET")
                .arg(&key)
                .arg("absexp")
                .arg("sldexp")
                .arg("data")
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheStoreError::Backend(format!("HMGET failed: {e}")))?;

        let Some(data) = data else {
            return Ok(None);
        };

        if let Some(window) = refresh_window_ms(
            absexp.unwrap_or(ABSENT),
            sldexp.unwrap_or(ABSENT),
            now_ms(),
        ) {
            let _: () = redis::cmd("PEXPIRE")
                .arg(&key)
                .arg(window)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheStoreError::Backend(format!("PEXPIRE failed: {e}")))?;
        }

        Ok(Some(Bytes::from(data)))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        options: EntryOptions,
    ) -> Result<(), CacheStoreError> {
        let key = self.namespaced(key);
        let now = now_ms();
        let absexp = options.absolute.map_or(ABSENT, |ttl| now + duration_ms(ttl));
        let sldexp = options.sliding.map_or(ABSENT, duration_ms);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("DEL")
            .arg(&key)
            .ignore()
            .cmd("HSET")
            .arg(&key)
            .arg("absexp")
            .arg(absexp)
            .arg("sldexp")
            .arg(sldexp)
            .arg("data")
            .arg(&value[..])
            .ignore();
        if let Some(window) = initial_window_ms(absexp, sldexp, now) {
            pipe.cmd("PEXPIRE").arg(&key).arg(window).ignore();
        }

        let mut conn = self.manager.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheStoreError::Backend(format!("HSET failed: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheStoreError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("DEL")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheStoreError::Backend(format!("DEL failed: {e}")))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheStoreError> {
        let mut conn = self.manager.clone();
        let found: bool = redis::cmd("EXISTS")
            .arg(self.namespaced(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheStoreError::Backend(format!("EXISTS failed: {e}")))?;
        Ok(found)
    }
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Live window right after a write, or `None` when the entry never expires.
fn initial_window_ms(absexp: i64, sldexp: i64, now: i64) -> Option<i64> {
    let until_hard = (absexp != ABSENT).then(|| absexp - now);
    let idle = (sldexp != ABSENT).then_some(sldexp);
    match (until_hard, idle) {
        (Some(hard), Some(idle)) => Some(hard.min(idle)),
        (hard, idle) => hard.or(idle),
    }
    .map(|window| window.max(1))
}

/// Window to apply after a read. Only sliding entries are renewed.
fn refresh_window_ms(absexp: i64, sldexp: i64, now: i64) -> Option<i64> {
    if sldexp == ABSENT {
        return None;
    }
    initial_window_ms(absexp, sldexp, now)
}

/// Redact credentials from a Redis URL for logging.
fn redact_url(url: &str) -> String {
    let authority_start = url.find("://").map_or(0, |i| i + 3);
    let authority_end = url[authority_start..]
        .find('/')
        .map_or(url.len(), |i| authority_start + i);
    let authority = &url[authority_start..authority_end];
    // The password may itself contain '@' or ':'.
    if let Some(at) = authority.rfind('@')
        && let Some(colon) = authority[..at].find(':')
    {
        return format!(
            "{}***{}",
            &url[..=authority_start + colon],
            &url[authority_start + at..]
        );
    }
    url.to_string()
}
