pub mod error;
pub mod handlers;
pub mod query;
pub mod state;

pub use state::ApiState;

use axum::{Router, routing::get};

use crate::infra::http::RouterState;

pub fn build_api_router() -> Router<RouterState> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/catalog/products", get(handlers::list_products))
        .route("/api/catalog/filters", get(handlers::get_filters))
        .route("/api/catalog/stats", get(handlers::catalog_stats))
        .route(
            "/api/catalog/parameters/{slug}/values",
            get(handlers::attribute_values),
        )
        .route(
            "/api/catalog/parameters/{slug}/stats",
            get(handlers::value_stats),
        )
        .fallback(handlers::not_found)
}
