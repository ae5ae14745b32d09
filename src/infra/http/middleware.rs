use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use crate::application::error::ErrorReport;
use crate::cache::{CORRELATION_HEADER, Subject, correlation_id};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
}

/// Pin a correlation id on the request so every layer below sees the same one,
/// and echo it back to the caller.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let correlation_id = correlation_id(request.headers());
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }
    let ctx = RequestContext { correlation_id };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let subject = request
        .extensions()
        .get::<Subject>()
        .map(|subject| subject.0.clone());
    let correlation_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.correlation_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target: "aside::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms,
                source,
                detail = %detail,
                chain = ?messages,
                correlation_id,
                user = subject.as_deref().unwrap_or(""),
                "request failed",
            );
        } else {
            warn!(
                target: "aside::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms,
                source,
                detail = %detail,
                correlation_id,
                user = subject.as_deref().unwrap_or(""),
                "client request error",
            );
        }
    }

    response
}
