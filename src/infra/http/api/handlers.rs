use axum::Json;
use axum::extract::{OriginalUri, Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::catalog::{HealthReport, ListQuery};
use crate::application::error::{CatalogError, ErrorReport};
use crate::application::facets::Facet;
use crate::application::pagination::ProductPage;
use crate::domain::entities::{CatalogStats, ValueStats};
use crate::domain::filters::ActiveFilters;

use super::error::{ApiError, ApiErrorDebug};
use super::query::CatalogQuery;
use super::state::ApiState;

#[derive(Debug, Serialize)]
pub struct EndpointDoc {
    pub path: &'static str,
    pub description: &'static str,
    pub parameters: &'static [(&'static str, &'static str)],
    pub example: &'static str,
}

#[derive(Debug, Serialize)]
pub struct IndexBody {
    pub api: &'static str,
    pub version: &'static str,
    pub endpoints: &'static [EndpointDoc],
}

const ENDPOINTS: &[EndpointDoc] = &[
    EndpointDoc {
        path: "/api/catalog/products",
        description: "Paginated product list",
        parameters: &[
            ("page", "integer, default 1"),
            ("limit", "integer, default 10"),
            ("sort_by", "id_asc | price_asc | price_desc"),
            ("filter[attribute_slug]", "string or list"),
        ],
        example: "/api/catalog/products?page=1&limit=10&sort_by=price_asc&filter[brend]=Nike",
    },
    EndpointDoc {
        path: "/api/catalog/filters",
        description: "Available facets with live counts",
        parameters: &[("filter[attribute_slug]", "string or list (active filters)")],
        example: "/api/catalog/filters?filter[brend]=Nike",
    },
    EndpointDoc {
        path: "/api/catalog/stats",
        description: "Catalog size and price range",
        parameters: &[],
        example: "/api/catalog/stats",
    },
    EndpointDoc {
        path: "/api/catalog/parameters/{slug}/values",
        description: "Known values of one attribute",
        parameters: &[],
        example: "/api/catalog/parameters/brend/values",
    },
    EndpointDoc {
        path: "/api/catalog/parameters/{slug}/stats",
        description: "Product count and price range for one attribute value",
        parameters: &[("value", "string, required")],
        example: "/api/catalog/parameters/brend/stats?value=Nike",
    },
];

pub async fn index() -> Json<IndexBody> {
    Json(IndexBody {
        api: "Catalog API",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: ENDPOINTS,
    })
}

pub async fn health(State(state): State<ApiState>) -> Response {
    let report: HealthReport = state.catalog.health().await;
    if report.is_healthy() {
        return (StatusCode::OK, Json(report)).into_response();
    }

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response();
    ErrorReport::from_message(
        "infra::http::api::health",
        StatusCode::SERVICE_UNAVAILABLE,
        "catalog store is unavailable",
    )
    .attach(&mut response);
    response
}

pub async fn not_found(OriginalUri(uri): OriginalUri, RawQuery(raw): RawQuery) -> ApiError {
    let query = CatalogQuery::parse(raw.as_deref());
    ApiError::not_found("Invalid endpoint").with_debug(echo(
        &query,
        uri.path(),
        query.filters_for_echo(),
    ))
}

pub async fn list_products(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    RawQuery(raw): RawQuery,
) -> Result<Json<ProductPage>, ApiError> {
    let query = CatalogQuery::parse(raw.as_deref());
    let filters = parsed_filters(&query, uri.path())?;

    let list = ListQuery {
        page: query.number("page"),
        limit: query.number("limit"),
        sort: query.text("sort_by").map(str::to_string),
        filters,
    };

    state
        .catalog
        .list_products(&list)
        .await
        .map(Json)
        .map_err(|err| {
            catalog_error(&state, "infra::http::api::list_products", &err)
                .with_debug(echo(&query, uri.path(), list.filters.clone()))
        })
}

pub async fn get_filters(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<Facet>>, ApiError> {
    let query = CatalogQuery::parse(raw.as_deref());
    let filters = parsed_filters(&query, uri.path())?;

    state
        .catalog
        .get_filters(&filters)
        .await
        .map(Json)
        .map_err(|err| {
            catalog_error(&state, "infra::http::api::get_filters", &err)
                .with_debug(echo(&query, uri.path(), filters.clone()))
        })
}

pub async fn catalog_stats(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    RawQuery(raw): RawQuery,
) -> Result<Json<CatalogStats>, ApiError> {
    state.catalog.catalog_stats().await.map(Json).map_err(|err| {
        let query = CatalogQuery::parse(raw.as_deref());
        catalog_error(&state, "infra::http::api::catalog_stats", &err)
            .with_debug(echo(&query, uri.path(), ActiveFilters::new()))
    })
}

#[derive(Debug, Serialize)]
pub struct AttributeValuesBody {
    pub slug: String,
    pub values: Vec<String>,
}

pub async fn attribute_values(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    Path(slug): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<AttributeValuesBody>, ApiError> {
    let values = state.catalog.attribute_values(&slug).await.map_err(|err| {
        let query = CatalogQuery::parse(raw.as_deref());
        catalog_error(&state, "infra::http::api::attribute_values", &err)
            .with_debug(echo_input(&query, uri.path(), &[("slug", &slug)]))
    })?;
    Ok(Json(AttributeValuesBody { slug, values }))
}

#[derive(Debug, Serialize)]
pub struct ValueStatsBody {
    pub slug: String,
    pub value: String,
    #[serde(flatten)]
    pub stats: ValueStats,
}

pub async fn value_stats(
    State(state): State<ApiState>,
    OriginalUri(uri): OriginalUri,
    Path(slug): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<ValueStatsBody>, ApiError> {
    let query = CatalogQuery::parse(raw.as_deref());
    let value = query
        .text("value")
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::bad_request("query parameter `value` is required")
                .with_debug(echo_input(&query, uri.path(), &[("slug", &slug)]))
        })?;

    let stats = state.catalog.value_stats(&slug, &value).await.map_err(|err| {
        catalog_error(&state, "infra::http::api::value_stats", &err).with_debug(echo_input(
            &query,
            uri.path(),
            &[("slug", &slug), ("value", &value)],
        ))
    })?;
    Ok(Json(ValueStatsBody { slug, value, stats }))
}

fn parsed_filters(query: &CatalogQuery, path: &str) -> Result<ActiveFilters, ApiError> {
    query.filters.clone().map_err(|err| {
        ApiError::invalid_filter(&err).with_debug(echo(query, path, query.filters_for_echo()))
    })
}

fn catalog_error(state: &ApiState, source: &'static str, err: &CatalogError) -> ApiError {
    ApiError::from_catalog(source, err, state.expose_error_detail)
}

fn echo(query: &CatalogQuery, path: &str, filters: ActiveFilters) -> ApiErrorDebug {
    ApiErrorDebug::new(path, filters, query.params.clone())
}

/// Echo for endpoints addressed by path segments; the normalized segments
/// are reported next to the query parameters.
fn echo_input(query: &CatalogQuery, path: &str, input: &[(&str, &str)]) -> ApiErrorDebug {
    let mut params = query.params.clone();
    for (name, value) in input {
        params.insert((*name).to_string(), (*value).to_string());
    }
    ApiErrorDebug::new(path, ActiveFilters::new(), params)
}
