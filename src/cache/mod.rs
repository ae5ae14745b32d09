//! Cache-aside response caching.
//!
//! - [`keys`]: deterministic keys from a handler identity and vary policy
//! - [`CacheStore`]: key-value storage with absolute and sliding lifetimes,
//!   backed by Redis or process memory
//! - [`CacheInterceptor`]: lookup, invoke, store and metadata mirroring
//! - [`cache_aside_layer`]: the same flow as axum route middleware
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_absolute_minutes = 60
//! default_sliding_minutes = 20
//! sweep_interval_minutes = 30
//! ```

mod config;
mod interceptor;
pub mod keys;
mod lock;
mod middleware;
mod redis;
mod store;

pub use config::CacheConfig;
pub use interceptor::{CacheInterceptor, CacheStatus, Cached, RequestOrigin, metadata_expiry};
pub use keys::{RequestContext, build_key, handler_prefix};
pub use middleware::{
    CORRELATION_HEADER, CachedResponse, CachedRoute, Subject, cache_aside_layer, correlation_id,
};
pub use redis::RedisBackend;
pub use store::{CacheBackend, CacheStore, CacheStoreError, EntryOptions, MemoryBackend};
