//! Request-facing catalog operations: product listing, facets and
//! statistics, each reading through the mirror where it can.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::application::error::CatalogError;
use crate::application::facets::{Facet, FacetCalculator};
use crate::application::pagination::{PageRequest, ProductPage, ProductPager};
use crate::application::repos::CatalogRepo;
use crate::application::resolver::FilterResolver;
use crate::cache::{ResultCache, result_page};
use crate::config::CatalogSettings;
use crate::domain::entities::{CatalogStats, ValueStats};
use crate::domain::filters::ActiveFilters;
use crate::domain::types::{ProductSort, Tier};

/// Raw listing parameters as they arrive from a caller.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort: Option<String>,
    pub filters: ActiveFilters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ok,
    Unavailable,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub store: ComponentStatus,
    pub mirror: ComponentStatus,
    pub mirror_ready: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store == ComponentStatus::Ok
    }
}

pub struct CatalogService {
    repo: Arc<dyn CatalogRepo>,
    resolver: Arc<FilterResolver>,
    facets: FacetCalculator,
    pager: ProductPager,
    results: Option<ResultCache>,
    settings: CatalogSettings,
}

impl CatalogService {
    pub fn new(
        repo: Arc<dyn CatalogRepo>,
        resolver: Arc<FilterResolver>,
        results: Option<ResultCache>,
        settings: CatalogSettings,
    ) -> Self {
        let facets = FacetCalculator::new(
            resolver.clone(),
            settings.primary_facet_slug.clone(),
            settings.excluded_slugs.iter().cloned(),
        );
        let pager = ProductPager::new(repo.clone());
        Self {
            repo,
            resolver,
            facets,
            pager,
            results,
            settings,
        }
    }

    pub fn resolver(&self) -> &Arc<FilterResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub async fn list_products(&self, query: &ListQuery) -> Result<ProductPage, CatalogError> {
        let request =
            PageRequest::normalize(query.page, query.limit, self.settings.default_page_size);
        let sort = ProductSort::parse_lenient(query.sort.as_deref());
        let key = result_page(
            &query.filters.digest(),
            sort,
            request.page.get(),
            request.per_page.get(),
        );

        if let Some(results) = self.results.as_ref() {
            match results.page(&key).await {
                Ok(Some(page)) => return Ok(page),
                Ok(None) => {}
                Err(err) => warn!(
                    target = "catalog::application::catalog",
                    key = %key,
                    error = %err,
                    "Result cache read failed"
                ),
            }
        }

        // Read before resolving: the page may only be cached under the
        // generation it was computed from.
        let generation = match self.results.as_ref() {
            Some(results) => results.generation().await.unwrap_or_else(|err| {
                warn_read("generation", &err);
                None
            }),
            None => None,
        };

        let selection = self.resolver.resolve(&query.filters).await?;
        let page = self.pager.page(&selection.value, sort, request).await?;

        // Store-tier pages are never cached: the mirror was unreadable or
        // unpopulated when they were computed.
        if selection.tier == Tier::Mirror
            && let Some(results) = self.results.as_ref()
            && let Some(generation) = generation.as_deref()
        {
            match results.store_page(&key, &page, generation).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    target = "catalog::application::catalog",
                    key = %key,
                    generation,
                    "Mirror rebuilt during listing; page not cached"
                ),
                Err(err) => warn!(
                    target = "catalog::application::catalog",
                    key = %key,
                    error = %err,
                    "Result cache write failed"
                ),
            }
        }

        Ok(page)
    }

    pub async fn get_filters(&self, filters: &ActiveFilters) -> Result<Vec<Facet>, CatalogError> {
        self.facets.compute(filters).await
    }

    pub async fn catalog_stats(&self) -> Result<CatalogStats, CatalogError> {
        if let Some(results) = self.results.as_ref() {
            match results.catalog_stats().await {
                Ok(Some(stats)) => return Ok(stats),
                Ok(None) => {}
                Err(err) => warn_read("catalog_stats", &err),
            }
        }

        let stats = self.repo.catalog_stats().await?;
        if let Some(results) = self.results.as_ref()
            && let Err(err) = results.store_catalog_stats(&stats).await
        {
            warn_write("catalog_stats", &err);
        }
        Ok(stats)
    }

    /// Known display values of one attribute, sorted.
    pub async fn attribute_values(&self, slug: &str) -> Result<Vec<String>, CatalogError> {
        if let Some(results) = self.results.as_ref() {
            match results.known_values(slug).await {
                Ok(values) if !values.is_empty() => return Ok(values),
                Ok(_) => {}
                Err(err) => warn_read("known_values", &err),
            }
        }

        let mut values = self.repo.known_values(slug).await?;
        values.sort();
        Ok(values)
    }

    pub async fn value_stats(&self, slug: &str, value: &str) -> Result<ValueStats, CatalogError> {
        if let Some(results) = self.results.as_ref() {
            match results.value_stats(slug, value).await {
                Ok(Some(stats)) => return Ok(stats),
                Ok(None) => {}
                Err(err) => warn_read("value_stats", &err),
            }
        }

        let stats = self.repo.value_stats(slug, value).await?;
        if let Some(results) = self.results.as_ref()
            && let Err(err) = results.store_value_stats(slug, value, &stats).await
        {
            warn_write("value_stats", &err);
        }
        Ok(stats)
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.repo.health_check().await {
            Ok(()) => ComponentStatus::Ok,
            Err(err) => {
                warn!(
                    target = "catalog::application::catalog",
                    error = %err,
                    "Store health check failed"
                );
                ComponentStatus::Unavailable
            }
        };

        let (mirror, mirror_ready) = if !self.resolver.has_mirror() {
            (ComponentStatus::Disabled, false)
        } else {
            match self.resolver.mirror_ready().await {
                Ok(ready) => (ComponentStatus::Ok, ready),
                Err(err) => {
                    warn!(
                        target = "catalog::application::catalog",
                        error = %err,
                        "Mirror health check failed"
                    );
                    (ComponentStatus::Unavailable, false)
                }
            }
        };

        HealthReport {
            store,
            mirror,
            mirror_ready,
        }
    }
}

fn warn_read(op: &'static str, err: &crate::cache::MirrorError) {
    warn!(
        target = "catalog::application::catalog",
        op,
        error = %err,
        "Mirror read failed; answering from store"
    );
}

fn warn_write(op: &'static str, err: &crate::cache::MirrorError) {
    warn!(
        target = "catalog::application::catalog",
        op,
        error = %err,
        "Mirror write-back failed"
    );
}
