//! Response bodies served by the aside management endpoints.
//!
//! Kept in a separate crate so reporting tools can decode them without
//! pulling in the server.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One cache entry as reported by the stats endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntryView {
    pub cache_key: String,
    pub request_url: String,
    pub http_method: String,
    pub hit_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_accessed: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// Payload size in kibibytes, rounded to two decimals.
    pub data_size_kb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub total_cached_requests: u64,
    pub top_hit_requests: Vec<CacheEntryView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub message: String,
    pub removed: u64,
}

/// Convert a byte count into kibibytes rounded to two decimals.
pub fn bytes_to_kb(bytes: i64) -> f64 {
    ((bytes as f64 / 1024.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_rounding() {
        assert_eq!(bytes_to_kb(0), 0.0);
        assert_eq!(bytes_to_kb(1024), 1.0);
        assert_eq!(bytes_to_kb(1536), 1.5);
        assert_eq!(bytes_to_kb(1000), 0.98);
    }

    #[test]
    fn stats_response_serializes_rfc3339() {
        let at = time::macros::datetime!(2025-01-02 03:04:05 UTC);
        let response = CacheStatsResponse {
            total_cached_requests: 1,
            top_hit_requests: vec![CacheEntryView {
                cache_key: "cache:Example_GetTime".to_string(),
                request_url: "/api/cache-example/time".to_string(),
                http_method: "GET".to_string(),
                hit_count: 3,
                cached_at: at,
                last_accessed: at,
                expires_at: at,
                data_size_kb: 0.5,
            }],
        };

        let json = serde_json::to_value(&response).expect("stats serialize");
        assert_eq!(json["total_cached_requests"], 1);
        assert_eq!(
            json["top_hit_requests"][0]["cached_at"],
            "2025-01-02T03:04:05Z"
        );
    }
}
