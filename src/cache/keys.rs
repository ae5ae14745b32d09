//! Cache key derivation.
//!
//! A key is the handler identity followed by the values of each declared
//! vary dimension, in declaration order. Missing values are skipped without
//! a placeholder, so a request lacking `id` and a request whose `id` was
//! never declared share a key.

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use sha2::{Digest, Sha256};

use crate::domain::policy::VaryPolicy;

pub const KEY_PREFIX: &str = "cache:";

/// Width of the metadata key column. Longer keys are compacted.
pub const MAX_KEY_LEN: usize = 255;

/// Request inputs a key can vary on.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub subject: Option<String>,
}

impl RequestContext {
    pub fn from_parts(uri: &Uri, headers: &HeaderMap, subject: Option<String>) -> Self {
        let query = Query::<Vec<(String, String)>>::try_from_uri(uri)
            .map(|Query(pairs)| pairs)
            .unwrap_or_default();

        Self {
            query,
            headers: headers.clone(),
            subject,
        }
    }

    fn query_value(&self, name: &str) -> Option<String> {
        join_values(
            self.query
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
        )
    }

    fn header_value(&self, name: &str) -> Option<String> {
        join_values(
            self.headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        )
    }
}

fn join_values<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = values.collect::<Vec<_>>().join(",");
    (!joined.is_empty()).then_some(joined)
}

/// Derive the cache key for one invocation of `handler`.
pub fn build_key(handler: &str, vary: &VaryPolicy, ctx: &RequestContext) -> String {
    let mut key = format!("{KEY_PREFIX}{handler}");

    for name in &vary.query_params {
        if let Some(value) = ctx.query_value(name) {
            push_segment(&mut key, name, &value);
        }
    }

    for name in &vary.headers {
        if let Some(value) = ctx.header_value(name) {
            push_segment(&mut key, name, &value);
        }
    }

    if vary.by_user
        && let Some(subject) = ctx.subject.as_deref()
    {
        push_segment(&mut key, "user", subject);
    }

    compact(handler, key)
}

/// Key prefix shared by every entry a handler produces.
pub fn handler_prefix(handler: &str) -> String {
    format!("{KEY_PREFIX}{handler}")
}

fn push_segment(key: &mut String, name: &str, value: &str) {
    key.push('_');
    key.push_str(name);
    key.push('=');
    key.push_str(value);
}

fn compact(handler: &str, key: String) -> String {
    if key.len() <= MAX_KEY_LEN {
        return key;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{KEY_PREFIX}{handler}#{digest}")
}
