//! Demonstration endpoints for the response cache.

use std::convert::Infallible;

use aside_api_types::ClearCacheResponse;
use axum::{
    Extension, Json, Router,
    extract::{OriginalUri, Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, macros::format_description};
use tracing::info;

use crate::cache::{CacheStatus, CachedRoute, RequestOrigin, Subject, correlation_id, handler_prefix};
use crate::domain::policy::{CachePolicy, ExpirationPolicy};

use super::{HttpState, repo_error_to_http};

pub const TIME_HANDLER: &str = "CacheExample_GetTime";
pub const DATA_HANDLER: &str = "CacheExample_GetData";

const SOURCE: &str = "infra::http::cache_example";
const TOP_HITS: u32 = 5;

pub(super) fn router(state: &HttpState) -> Router<HttpState> {
    let time_route = CachedRoute::new(
        state.cache.clone(),
        CachePolicy::new(TIME_HANDLER).absolute_minutes(2),
    );
    let data_route = CachedRoute::new(
        state.cache.clone(),
        CachePolicy::new(DATA_HANDLER)
            .absolute_minutes(5)
            .vary_by_query(["id"]),
    );

    Router::new()
        .route(
            "/time",
            get(current_time).layer(middleware::from_fn_with_state(
                time_route,
                crate::cache::cache_aside_layer,
            )),
        )
        .route(
            "/data",
            get(data).layer(middleware::from_fn_with_state(
                data_route,
                crate::cache::cache_aside_layer,
            )),
        )
        .route("/manual/{id}", get(manual))
        .route("/stats", get(stats))
        .route("/clear", delete(clear))
}

fn clock() -> String {
    OffsetDateTime::now_utc()
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
struct TimePayload {
    #[serde(with = "time::serde::rfc3339")]
    current_time: OffsetDateTime,
    message: &'static str,
    generated_at: String,
}

async fn current_time() -> Json<TimePayload> {
    info!("Serving current time");
    Json(TimePayload {
        current_time: OffsetDateTime::now_utc(),
        message: "This response is cached for 2 minutes",
        generated_at: clock(),
    })
}

#[derive(Debug, Deserialize)]
struct DataQuery {
    #[serde(default)]
    id: i32,
}

#[derive(Debug, Serialize)]
struct DataPayload {
    id: i32,
    data: String,
    complex_calculation: String,
    generated_at: String,
}

async fn data(Query(query): Query<DataQuery>) -> Json<DataPayload> {
    let id = query.id;
    info!(id, "Serving data");
    Json(DataPayload {
        id,
        data: format!("Data {id}"),
        complex_calculation: format!("Result of the expensive calculation for id {id}"),
        generated_at: clock(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DetailedInfo {
    created_by: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    expires_in: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManualPayload {
    id: i32,
    data: String,
    detailed_info: DetailedInfo,
    generated_at: String,
}

async fn manual(
    State(state): State<HttpState>,
    Path(id): Path<i32>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    subject: Option<Extension<Subject>>,
) -> Response {
    let origin = RequestOrigin {
        url: uri.to_string(),
        method: "GET".to_string(),
        user_id: subject.map(|Extension(subject)| subject.0),
        correlation_id: Some(correlation_id(&headers)),
    };
    let key = format!("manual_data_{id}");

    let result = state
        .cache
        .invoke(&key, ExpirationPolicy::new(Some(10), Some(5)), &origin, || async move {
            Ok::<_, Infallible>(Some(ManualPayload {
                id,
                data: format!("Manually cached data {id}"),
                detailed_info: DetailedInfo {
                    created_by: "System".to_string(),
                    created_at: OffsetDateTime::now_utc(),
                    expires_in: "10 minutes".to_string(),
                },
                generated_at: clock(),
            }))
        })
        .await;

    let cached = match result {
        Ok(cached) => cached,
        Err(never) => match never {},
    };
    let mut response = Json(cached.value).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(CacheStatus::HEADER),
        HeaderValue::from_static(cached.status.as_str()),
    );
    response
}

async fn stats(State(state): State<HttpState>) -> Response {
    match state.admin.stats(TOP_HITS).await {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ClearQuery {
    key: Option<String>,
}

async fn clear(State(state): State<HttpState>, Query(query): Query<ClearQuery>) -> Response {
    if let Some(key) = query.key.filter(|key| !key.is_empty()) {
        let removed = u64::from(state.admin.remove(&key).await);
        return Json(ClearCacheResponse {
            message: format!("Cache cleared for key: {key}"),
            removed,
        })
        .into_response();
    }

    info!("Clearing all time-based cache entries");
    let time_removed = u64::from(state.admin.remove(&handler_prefix(TIME_HANDLER)).await);
    match state.admin.remove_matching(&handler_prefix(DATA_HANDLER)).await {
        Ok(data_removed) => Json(ClearCacheResponse {
            message: "All time-based cache entries cleared".to_string(),
            removed: time_removed + data_removed,
        })
        .into_response(),
        Err(err) => repo_error_to_http(SOURCE, err).into_response(),
    }
}
