//! [`ProductIndex`] answered from the cache mirror.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::application::error::CatalogError;
use crate::application::index::{ProductIndex, Selection};
use crate::domain::entities::{AttributeRecord, ValueCount};
use crate::domain::filters::{ActiveFilters, canonical_value};
use crate::domain::types::{ProductId, Tier};

use super::error::MirrorError;
use super::keys;
use super::store::{MirrorOp, MirrorStore};

pub struct MirrorIndex {
    store: Arc<dyn MirrorStore>,
    scratch_ttl: Duration,
}

impl MirrorIndex {
    pub fn new(store: Arc<dyn MirrorStore>, scratch_ttl: Duration) -> Self {
        Self { store, scratch_ttl }
    }

    async fn resolve_into(
        &self,
        filters: &ActiveFilters,
        unions: &mut Vec<String>,
        result_key: &str,
    ) -> Result<Selection, MirrorError> {
        for (slug, _) in filters.iter() {
            let value_keys: Vec<String> = filters
                .canonical_values(slug)
                .iter()
                .map(|value| keys::value_set(slug, value))
                .collect();
            if value_keys.is_empty() {
                continue;
            }

            let union_key = keys::scratch_union();
            unions.push(union_key.clone());
            let size = self
                .store
                .union_store(&union_key, &value_keys, self.scratch_ttl)
                .await?;
            if size == 0 {
                return Ok(Selection::NoMatch);
            }
        }

        if unions.is_empty() {
            return Ok(Selection::All);
        }

        let size = self
            .store
            .intersect_store(result_key, unions, self.scratch_ttl)
            .await?;
        if size == 0 {
            return Ok(Selection::NoMatch);
        }

        let members = self.store.members(result_key).await?;
        Ok(Selection::from_ids(parse_ids(result_key, members)?))
    }

    /// Count each value set against `ids` inside the mirror. The selection is
    /// staged in a scratch set that is removed on every exit path.
    async fn scoped_counts(
        &self,
        ids: &BTreeSet<ProductId>,
        set_keys: &[String],
    ) -> Result<Vec<u64>, MirrorError> {
        if set_keys.is_empty() {
            return Ok(Vec::new());
        }

        let scope_key = keys::scratch_result();
        let outcome = self.count_within(&scope_key, ids, set_keys).await;
        self.discard_scratch(std::slice::from_ref(&scope_key)).await;
        outcome
    }

    async fn count_within(
        &self,
        scope_key: &str,
        ids: &BTreeSet<ProductId>,
        set_keys: &[String],
    ) -> Result<Vec<u64>, MirrorError> {
        self.store
            .apply(vec![
                MirrorOp::SetAdd {
                    key: scope_key.to_string(),
                    members: ids.iter().map(ToString::to_string).collect(),
                },
                MirrorOp::Expire {
                    key: scope_key.to_string(),
                    ttl: self.scratch_ttl,
                },
            ])
            .await?;
        self.store.intersect_cardinalities(scope_key, set_keys).await
    }

    async fn discard_scratch(&self, scratch: &[String]) {
        if let Err(err) = self.store.delete(scratch).await {
            warn!(
                target = "catalog::cache::index",
                error = %err,
                keys = scratch.len(),
                "Failed to delete scratch sets; relying on expiry"
            );
        }
    }
}

fn parse_ids(key: &str, members: Vec<String>) -> Result<Vec<ProductId>, MirrorError> {
    members
        .into_iter()
        .map(|member| {
            member
                .parse::<ProductId>()
                .map_err(|err| MirrorError::corrupt(key, format!("`{member}`: {err}")))
        })
        .collect()
}

#[async_trait]
impl ProductIndex for MirrorIndex {
    fn tier(&self) -> Tier {
        Tier::Mirror
    }

    async fn is_ready(&self) -> Result<bool, CatalogError> {
        Ok(self.store.exists(keys::READY_MARKER).await?)
    }

    async fn attributes(&self) -> Result<Vec<AttributeRecord>, CatalogError> {
        let registry = self.store.hash_get_all(keys::ATTRIBUTE_REGISTRY).await?;
        let mut attributes = registry
            .into_iter()
            .map(|(slug, raw)| {
                serde_json::from_str::<AttributeRecord>(&raw).map_err(|err| {
                    MirrorError::corrupt(keys::ATTRIBUTE_REGISTRY, format!("`{slug}`: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        attributes.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.slug.cmp(&b.slug))
        });
        Ok(attributes)
    }

    async fn all_products(&self) -> Result<BTreeSet<ProductId>, CatalogError> {
        let members = self.store.members(keys::ALL_PRODUCTS).await?;
        Ok(parse_ids(keys::ALL_PRODUCTS, members)?.into_iter().collect())
    }

    async fn resolve(&self, filters: &ActiveFilters) -> Result<Selection, CatalogError> {
        if filters.is_empty() {
            return Ok(Selection::All);
        }

        let result_key = keys::scratch_result();
        let mut scratch = Vec::with_capacity(filters.len() + 1);
        let outcome = self.resolve_into(filters, &mut scratch, &result_key).await;

        scratch.push(result_key);
        self.discard_scratch(&scratch).await;

        Ok(outcome?)
    }

    async fn value_counts(
        &self,
        slugs: &[String],
        selection: &Selection,
    ) -> Result<Vec<ValueCount>, CatalogError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }

        let registry_keys: Vec<String> = slugs.iter().map(|slug| keys::known_values(slug)).collect();
        let known = self.store.members_many(&registry_keys).await?;

        let mut pending = Vec::new();
        for (slug, displays) in slugs.iter().zip(known) {
            for display in displays {
                let canonical = canonical_value(&display);
                pending.push(ValueCount {
                    slug: slug.clone(),
                    canonical,
                    display,
                    count: 0,
                });
            }
        }

        let set_keys: Vec<String> = pending
            .iter()
            .map(|value| keys::value_set(&value.slug, &value.canonical))
            .collect();
        let counts = match selection {
            Selection::NoMatch => vec![0; set_keys.len()],
            Selection::All => self.store.cardinalities(&set_keys).await?,
            Selection::Matched(ids) => self.scoped_counts(ids, &set_keys).await?,
        };
        for (value, count) in pending.iter_mut().zip(counts) {
            value.count = count;
        }

        pending.sort_by(|a, b| a.slug.cmp(&b.slug).then_with(|| a.display.cmp(&b.display)));
        Ok(pending)
    }
}
