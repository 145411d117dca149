//! Active filters to product selections, choosing the tier per call.
//!
//! The mirror answers when it is reachable and carries the readiness marker.
//! Only [`CatalogError::CacheUnavailable`] sends a call to the store; a
//! mirror that answers "nothing matched" is believed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use metrics::counter;
use tracing::{debug, warn};

use crate::application::error::CatalogError;
use crate::application::index::{ProductIndex, Selection};
use crate::domain::entities::{AttributeRecord, ValueCount};
use crate::domain::filters::ActiveFilters;
use crate::domain::types::{ProductId, Tier};

/// A value together with the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tiered<T> {
    pub value: T,
    pub tier: Tier,
}

pub struct FilterResolver {
    store: Arc<dyn ProductIndex>,
    mirror: Option<Arc<dyn ProductIndex>>,
}

impl FilterResolver {
    pub fn new(store: Arc<dyn ProductIndex>, mirror: Option<Arc<dyn ProductIndex>>) -> Self {
        Self { store, mirror }
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Whether the mirror is reachable and fully populated.
    pub async fn mirror_ready(&self) -> Result<bool, CatalogError> {
        match self.mirror.as_ref() {
            Some(mirror) => mirror.is_ready().await,
            None => Ok(false),
        }
    }

    pub async fn resolve(&self, filters: &ActiveFilters) -> Result<Tiered<Selection>, CatalogError> {
        if filters.is_empty() {
            return Ok(Tiered {
                value: Selection::All,
                tier: self.preferred_tier().await,
            });
        }
        self.tiered("resolve", |index| index.resolve(filters)).await
    }

    /// Materialized id set; the empty filter set yields every product.
    pub async fn resolve_ids(&self, filters: &ActiveFilters) -> Result<BTreeSet<ProductId>, CatalogError> {
        if filters.is_empty() {
            return Ok(self.tiered("all_products", |index| index.all_products()).await?.value);
        }
        match self.resolve(filters).await?.value {
            Selection::All => Ok(self.tiered("all_products", |index| index.all_products()).await?.value),
            Selection::Matched(ids) => Ok(ids),
            Selection::NoMatch => Ok(BTreeSet::new()),
        }
    }

    pub async fn attributes(&self) -> Result<Vec<AttributeRecord>, CatalogError> {
        Ok(self.tiered("attributes", |index| index.attributes()).await?.value)
    }

    pub async fn value_counts(
        &self,
        slugs: &[String],
        selection: &Selection,
    ) -> Result<Vec<ValueCount>, CatalogError> {
        Ok(self
            .tiered("value_counts", |index| index.value_counts(slugs, selection))
            .await?
            .value)
    }

    async fn preferred_tier(&self) -> Tier {
        match self.ready_mirror("tier").await {
            Some(_) => Tier::Mirror,
            None => Tier::Store,
        }
    }

    async fn ready_mirror(&self, op: &'static str) -> Option<&Arc<dyn ProductIndex>> {
        let mirror = self.mirror.as_ref()?;
        match mirror.is_ready().await {
            Ok(true) => Some(mirror),
            Ok(false) => {
                debug!(
                    target = "catalog::application::resolver",
                    op, "Mirror not populated; answering from store"
                );
                None
            }
            Err(err) => {
                note_fallback(op, &err);
                None
            }
        }
    }

    async fn tiered<'a, T, F>(&'a self, op: &'static str, call: F) -> Result<Tiered<T>, CatalogError>
    where
        F: Fn(&'a dyn ProductIndex) -> BoxFuture<'a, Result<T, CatalogError>>,
    {
        if let Some(mirror) = self.ready_mirror(op).await {
            match call(mirror.as_ref()).await {
                Ok(value) => {
                    return Ok(Tiered {
                        value,
                        tier: Tier::Mirror,
                    });
                }
                Err(err @ CatalogError::CacheUnavailable(_)) => note_fallback(op, &err),
                Err(err) => return Err(err),
            }
        }

        let value = call(self.store.as_ref()).await?;
        Ok(Tiered {
            value,
            tier: Tier::Store,
        })
    }
}

fn note_fallback(op: &'static str, err: &CatalogError) {
    counter!("catalog_tier_fallback_total", "op" => op).increment(1);
    warn!(
        target = "catalog::application::resolver",
        op,
        error = %err,
        cause = ?std::error::Error::source(err).map(ToString::to_string),
        "Mirror unavailable; answering from store"
    );
}
