//! Request ids and failure logging applied to every route.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_FORWARDED_ID_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Reuse a caller-supplied request id when it is printable and short,
/// otherwise mint one. The id is echoed back on the response.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_FORWARDED_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Log every 4xx as a warning and every 5xx as an error, using the
/// [`ErrorReport`] the handler attached when there is one.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let query = request.uri().query().unwrap_or_default().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let (source, chain) = response
        .extensions_mut()
        .remove::<ErrorReport>()
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        error!(
            target = "catalog::http::response",
            status = status.as_u16(),
            %method,
            path = %path,
            query = %query,
            elapsed_ms,
            source,
            chain = ?chain,
            request_id = %request_id,
            "Request failed"
        );
    } else {
        warn!(
            target = "catalog::http::response",
            status = status.as_u16(),
            %method,
            path = %path,
            query = %query,
            elapsed_ms,
            source,
            chain = ?chain,
            request_id = %request_id,
            "Request rejected"
        );
    }

    response
}
