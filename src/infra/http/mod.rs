pub mod api;
mod middleware;

pub use api::{ApiState, build_api_router};
pub use middleware::{REQUEST_ID_HEADER, RequestContext};

use axum::Router;
use axum::extract::FromRef;
use axum::middleware as axum_middleware;

use middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct RouterState {
    pub api: ApiState,
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

/// The complete HTTP surface with request ids and response logging applied.
pub fn build_router(state: RouterState) -> Router {
    build_api_router()
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
