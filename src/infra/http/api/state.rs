use std::sync::Arc;

use crate::application::catalog::CatalogService;

#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<CatalogService>,
    pub expose_error_detail: bool,
}
