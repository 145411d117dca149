use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::error::{CatalogError, ErrorReport};
use crate::domain::error::FilterError;
use crate::domain::filters::ActiveFilters;

pub mod codes {
    pub const INVALID_FILTER: &str = "invalid_filter";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const CACHE_UNAVAILABLE: &str = "cache_unavailable";
    pub const NOT_FOUND: &str = "not_found";
    pub const BAD_REQUEST: &str = "bad_request";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<ApiErrorDebug>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Request echo returned with every failed catalog call.
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDebug {
    pub timestamp: String,
    pub path: String,
    pub filters: ActiveFilters,
    pub params: BTreeMap<String, String>,
}

impl ApiErrorDebug {
    pub fn new(
        path: impl Into<String>,
        filters: ActiveFilters,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            path: path.into(),
            filters,
            params,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
    debug: Option<ApiErrorDebug>,
    report: ErrorReport,
}

impl ApiError {
    fn new(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        report: ErrorReport,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint: None,
            debug: None,
            report,
        }
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            codes::NOT_FOUND,
            message,
            ErrorReport::from_message("infra::http::api", StatusCode::NOT_FOUND, message),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::BAD_REQUEST,
            message.clone(),
            ErrorReport::from_message("infra::http::api", StatusCode::BAD_REQUEST, message),
        )
    }

    pub fn invalid_filter(err: &FilterError) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            codes::INVALID_FILTER,
            err.to_string(),
            ErrorReport::from_error("infra::http::api::filters", StatusCode::BAD_REQUEST, err),
        )
    }

    /// `expose_detail` adds the error chain as `hint`; it names internal
    /// components and stays off in production.
    pub fn from_catalog(source: &'static str, err: &CatalogError, expose_detail: bool) -> Self {
        let (status, code, message) = match err {
            CatalogError::InvalidFilter(filter) => return Self::invalid_filter(filter),
            CatalogError::StoreUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::STORE_UNAVAILABLE,
                "Catalog store is unavailable",
            ),
            CatalogError::CacheUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE_UNAVAILABLE,
                "Catalog cache is unavailable",
            ),
        };
        let report = ErrorReport::from_error(source, status, err);
        let hint = expose_detail.then(|| report.messages.join(": "));
        let mut api_error = Self::new(status, code, message, report);
        api_error.hint = hint;
        api_error
    }

    pub fn with_debug(mut self, debug: ApiErrorDebug) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
            },
            debug: self.debug,
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        self.report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::repos::RepoError;

    #[test]
    fn store_failures_hide_detail_unless_exposed() {
        let err = CatalogError::StoreUnavailable(RepoError::Timeout);

        let hidden = ApiError::from_catalog("test", &err, false);
        assert_eq!(hidden.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(hidden.code(), codes::STORE_UNAVAILABLE);
        assert!(hidden.hint.is_none());

        let exposed = ApiError::from_catalog("test", &err, true);
        assert_eq!(
            exposed.hint.as_deref(),
            Some("relational store unavailable: database timeout")
        );
    }

    #[test]
    fn filter_errors_are_client_errors() {
        let err = CatalogError::InvalidFilter(FilterError::EmptySlug);
        let api_error = ApiError::from_catalog("test", &err, false);
        assert_eq!(api_error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api_error.code(), codes::INVALID_FILTER);
        assert_eq!(api_error.message, "filter attribute slug must not be empty");
    }
}
