//! Read-side seam shared by the relational store and the cache mirror.
//!
//! Both tiers answer the same questions; [`FilterResolver`] decides which one
//! is asked.
//!
//! [`FilterResolver`]: crate::application::resolver::FilterResolver

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::error::CatalogError;
use crate::application::repos::CatalogRepo;
use crate::domain::entities::{AttributeRecord, ValueCount};
use crate::domain::filters::ActiveFilters;
use crate::domain::types::{NO_MATCH_SENTINEL, ProductId, Tier};

/// Outcome of resolving a filter combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No filters were active: the whole catalog.
    All,
    /// A non-empty set of matching products.
    Matched(BTreeSet<ProductId>),
    /// Filters were active and nothing matched.
    NoMatch,
}

impl Selection {
    pub fn from_ids(ids: impl IntoIterator<Item = ProductId>) -> Self {
        let ids: BTreeSet<ProductId> = ids.into_iter().collect();
        if ids.is_empty() {
            Selection::NoMatch
        } else {
            Selection::Matched(ids)
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, Selection::NoMatch)
    }

    /// Flatten to an id list for APIs that cannot express "nothing"; the
    /// empty case becomes the reserved sentinel id.
    pub fn to_id_list(&self) -> Option<Vec<ProductId>> {
        match self {
            Selection::All => None,
            Selection::Matched(ids) => Some(ids.iter().copied().collect()),
            Selection::NoMatch => Some(vec![NO_MATCH_SENTINEL]),
        }
    }
}

#[async_trait]
pub trait ProductIndex: Send + Sync {
    fn tier(&self) -> Tier;

    /// Whether this tier holds a complete view it can answer from.
    async fn is_ready(&self) -> Result<bool, CatalogError>;

    async fn attributes(&self) -> Result<Vec<AttributeRecord>, CatalogError>;

    async fn all_products(&self) -> Result<BTreeSet<ProductId>, CatalogError>;

    /// Resolve a non-empty filter combination.
    async fn resolve(&self, filters: &ActiveFilters) -> Result<Selection, CatalogError>;

    /// Counts for every value of `slugs` that has ever had a product, counted
    /// against `selection`. Values with no match in `selection` report zero.
    async fn value_counts(
        &self,
        slugs: &[String],
        selection: &Selection,
    ) -> Result<Vec<ValueCount>, CatalogError>;
}

/// [`ProductIndex`] answered directly by the relational store.
pub struct StoreIndex {
    repo: Arc<dyn CatalogRepo>,
}

impl StoreIndex {
    pub fn new(repo: Arc<dyn CatalogRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ProductIndex for StoreIndex {
    fn tier(&self) -> Tier {
        Tier::Store
    }

    async fn is_ready(&self) -> Result<bool, CatalogError> {
        Ok(true)
    }

    async fn attributes(&self) -> Result<Vec<AttributeRecord>, CatalogError> {
        Ok(self.repo.list_attributes().await?)
    }

    async fn all_products(&self) -> Result<BTreeSet<ProductId>, CatalogError> {
        Ok(self.repo.all_product_ids().await?.into_iter().collect())
    }

    async fn resolve(&self, filters: &ActiveFilters) -> Result<Selection, CatalogError> {
        if filters.is_empty() {
            return Ok(Selection::All);
        }
        let ids = self.repo.resolve_filters(filters).await?;
        Ok(Selection::from_ids(ids))
    }

    async fn value_counts(
        &self,
        slugs: &[String],
        selection: &Selection,
    ) -> Result<Vec<ValueCount>, CatalogError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let scope = selection.to_id_list();
        Ok(self.repo.value_counts(slugs, scope.as_deref()).await?)
    }
}
