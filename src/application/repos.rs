//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::entities::{
    AttributeRecord, CatalogStats, ProductRecord, ValueCount, ValueMembership, ValueStats,
};
use crate::domain::filters::ActiveFilters;
use crate::domain::types::{ProductId, ProductSort};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// How widely an attribute is used; reported by the `stats` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeUsage {
    pub slug: String,
    pub name: String,
    pub products: u64,
    pub values: u64,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    /// Filterable attributes ordered by sort order, then name.
    async fn list_attributes(&self) -> Result<Vec<AttributeRecord>, RepoError>;

    async fn all_product_ids(&self) -> Result<Vec<ProductId>, RepoError>;

    async fn count_products(&self) -> Result<u64, RepoError>;

    /// Products matching a non-empty filter combination: values OR'ed within
    /// an attribute, attributes AND'ed, values compared case-insensitively.
    async fn resolve_filters(&self, filters: &ActiveFilters) -> Result<Vec<ProductId>, RepoError>;

    /// Distinct product counts for every linked value of `slugs`. `None`
    /// counts against the whole catalog; `Some` against the given ids only.
    async fn value_counts(
        &self,
        slugs: &[String],
        scope: Option<&[ProductId]>,
    ) -> Result<Vec<ValueCount>, RepoError>;

    /// One page of products; `None` scope lists the whole catalog.
    async fn list_products(
        &self,
        scope: Option<&[ProductId]>,
        sort: ProductSort,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ProductRecord>, RepoError>;

    /// Every (attribute, canonical value) pair with at least one product.
    async fn value_memberships(&self) -> Result<Vec<ValueMembership>, RepoError>;

    async fn catalog_stats(&self) -> Result<CatalogStats, RepoError>;

    async fn value_stats(&self, slug: &str, value: &str) -> Result<ValueStats, RepoError>;

    /// Display values of `slug` that have at least one product.
    async fn known_values(&self, slug: &str) -> Result<Vec<String>, RepoError>;

    async fn attribute_usage(&self, limit: u32) -> Result<Vec<AttributeUsage>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

/// An offer that passed validation and is ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedOffer {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
    pub parameters: Vec<PreparedParameter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedParameter {
    pub slug: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub products: u64,
    pub parameters: u64,
    pub values: u64,
    pub links: u64,
}

#[async_trait]
pub trait CatalogWriteRepo: Send + Sync {
    /// Upsert products, attributes and values and regenerate each product's
    /// links, all in one transaction.
    async fn import_offers(&self, offers: &[PreparedOffer]) -> Result<ImportSummary, RepoError>;
}
