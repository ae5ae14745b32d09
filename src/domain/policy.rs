//! Declarative caching policy attached to a route.
//!
//! A policy names the handler, the request dimensions that vary the cache
//! key, and how long a stored response may live.

use std::time::Duration;

/// Absolute and sliding lifetimes for a cached value, in minutes.
///
/// A value of zero is treated the same as an unset value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationPolicy {
    pub absolute_minutes: Option<u32>,
    pub sliding_minutes: Option<u32>,
}

impl ExpirationPolicy {
    pub fn new(absolute_minutes: Option<u32>, sliding_minutes: Option<u32>) -> Self {
        Self {
            absolute_minutes: absolute_minutes.filter(|m| *m > 0),
            sliding_minutes: sliding_minutes.filter(|m| *m > 0),
        }
    }

    pub fn absolute(minutes: u32) -> Self {
        Self::new(Some(minutes), None)
    }

    /// Fill unset lifetimes from the configured defaults.
    ///
    /// A default of zero leaves the lifetime unset.
    pub fn with_defaults(self, absolute_minutes: u32, sliding_minutes: u32) -> Self {
        Self::new(
            self.absolute_minutes.or(Some(absolute_minutes)),
            self.sliding_minutes.or(Some(sliding_minutes)),
        )
    }

    pub fn absolute_ttl(&self) -> Option<Duration> {
        self.absolute_minutes.map(minutes)
    }

    pub fn sliding_ttl(&self) -> Option<Duration> {
        self.sliding_minutes.map(minutes)
    }
}

fn minutes(value: u32) -> Duration {
    Duration::from_secs(u64::from(value) * 60)
}

/// Request dimensions that participate in key derivation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VaryPolicy {
    pub query_params: Vec<String>,
    pub headers: Vec<String>,
    pub by_user: bool,
}

/// Per-route caching configuration.
///
/// `handler` is the stable identity that prefixes every key produced for
/// the route, so bulk removal can match on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub handler: String,
    pub expiration: ExpirationPolicy,
    pub vary: VaryPolicy,
}

impl CachePolicy {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            expiration: ExpirationPolicy::default(),
            vary: VaryPolicy::default(),
        }
    }

    pub fn absolute_minutes(mut self, minutes: u32) -> Self {
        self.expiration = ExpirationPolicy::new(Some(minutes), self.expiration.sliding_minutes);
        self
    }

    pub fn sliding_minutes(mut self, minutes: u32) -> Self {
        self.expiration = ExpirationPolicy::new(self.expiration.absolute_minutes, Some(minutes));
        self
    }

    pub fn vary_by_query<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary.query_params = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn vary_by_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vary.headers = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn vary_by_user(mut self) -> Self {
        self.vary.by_user = true;
        self
    }
}
