//! Response cache middleware.
//!
//! Attach with `middleware::from_fn_with_state(CachedRoute::new(..), cache_aside_layer)`
//! on each route that should be cached. Only GET requests are considered.
//! Responses are stored when they are 2xx with a non-empty body, carry no
//! `Set-Cookie`, and are not event streams.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::policy::CachePolicy;

use super::interceptor::{CacheInterceptor, CacheStatus, RequestOrigin};
use super::keys::{RequestContext, build_key};

pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Authenticated caller, inserted into request extensions by auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject(pub String);

/// Per-route middleware state.
#[derive(Clone)]
pub struct CachedRoute {
    interceptor: Arc<CacheInterceptor>,
    policy: Arc<CachePolicy>,
}

impl CachedRoute {
    pub fn new(interceptor: Arc<CacheInterceptor>, policy: CachePolicy) -> Self {
        Self {
            interceptor,
            policy: Arc::new(policy),
        }
    }
}

#[instrument(skip_all, fields(handler = %route.policy.handler, path = %request.uri().path()))]
pub async fn cache_aside_layer(
    State(route): State<CachedRoute>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let subject = request
        .extensions()
        .get::<Subject>()
        .map(|subject| subject.0.clone());
    let ctx = RequestContext::from_parts(request.uri(), request.headers(), subject.clone());
    let key = build_key(&route.policy.handler, &route.policy.vary, &ctx);

    if let Some(cached) = route.interceptor.lookup::<CachedResponse>(&key).await {
        return cached.into_response();
    }

    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or(request.uri());
    let origin = RequestOrigin {
        url: uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string()),
        method: request.method().as_str().to_string(),
        user_id: subject,
        correlation_id: Some(correlation_id(request.headers())),
    };

    let response = next.run(request).await;
    if !should_store_response(&response)
        || exceeds_limit(&response, route.interceptor.config().max_body_bytes)
    {
        return mark(response, CacheStatus::Miss);
    }

    let (response, cached) = match buffer_response(response).await {
        Ok(buffered) => buffered,
        Err(response) => return mark(response, CacheStatus::Miss),
    };

    if cached.body.is_empty() || cached.body.len() > route.interceptor.config().max_body_bytes {
        debug!(key, size = cached.body.len(), "Response not cacheable");
    } else {
        route
            .interceptor
            .put(&key, &cached, route.policy.expiration, &origin)
            .await;
    }

    mark(response, CacheStatus::Miss)
}

/// Correlation id from the request, or a fresh one when absent.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    !response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
}

fn exceeds_limit(response: &Response, max_body_bytes: usize) -> bool {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok())
        .is_some_and(|length| length > max_body_bytes)
}

fn mark(mut response: Response, status: CacheStatus) -> Response {
    response.headers_mut().insert(
        HeaderName::from_static(CacheStatus::HEADER),
        HeaderValue::from_static(status.as_str()),
    );
    response
}

async fn buffer_response(response: Response) -> Result<(Response, CachedResponse), Response> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let cached = CachedResponse::new(parts.status, &parts.headers, bytes.clone());
            Ok((Response::from_parts(parts, Body::from(bytes)), cached))
        }
        Err(error) => {
            warn!(error = %error, "Failed to buffer response body");
            Err(StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

/// Serialized form of a cached HTTP response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "body_base64")]
    pub body: Bytes,
}

impl CachedResponse {
    fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| name.as_str() != CacheStatus::HEADER)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.to_string(), value.to_string()))
            })
            .collect();
        Self {
            status: status.as_u16(),
            headers,
            body,
        }
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut builder = Response::builder().status(self.status);
        for (name, value) in self.headers {
            if let Ok(value) = HeaderValue::from_str(&value) {
                builder = builder.header(name, value);
            }
        }
        builder
            .header(CacheStatus::HEADER, CacheStatus::Hit.as_str())
            .body(Body::from(self.body))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

mod body_base64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(D::Error::custom)
    }
}
