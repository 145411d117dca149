//! Facet counts for the filter sidebar.
//!
//! Every attribute is counted against the products matching the active
//! filters, except the primary attribute (brand). It is counted against the
//! filters without its own selection, so picking one brand never hides the
//! others.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::error::CatalogError;
use crate::application::index::Selection;
use crate::application::resolver::FilterResolver;
use crate::domain::entities::{AttributeRecord, ValueCount};
use crate::domain::filters::{ActiveFilters, canonical_value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    pub slug: String,
    pub values: Vec<FacetValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
    pub active: bool,
}

pub struct FacetCalculator {
    resolver: Arc<FilterResolver>,
    primary_slug: String,
    excluded: BTreeSet<String>,
}

impl FacetCalculator {
    pub fn new(
        resolver: Arc<FilterResolver>,
        primary_slug: impl Into<String>,
        excluded: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            resolver,
            primary_slug: primary_slug.into(),
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn primary_slug(&self) -> &str {
        &self.primary_slug
    }

    pub async fn compute(&self, filters: &ActiveFilters) -> Result<Vec<Facet>, CatalogError> {
        let attributes: Vec<AttributeRecord> = self
            .resolver
            .attributes()
            .await?
            .into_iter()
            .filter(|attribute| {
                attribute.slug == self.primary_slug
                    || (attribute.is_filterable && !self.excluded.contains(&attribute.slug))
            })
            .collect();

        let base = self.resolver.resolve(filters).await?.value;
        let primary_base = if filters.contains_slug(&self.primary_slug) {
            self.resolver
                .resolve(&filters.without(&self.primary_slug))
                .await?
                .value
        } else {
            base.clone()
        };

        let other_slugs: Vec<String> = attributes
            .iter()
            .filter(|attribute| attribute.slug != self.primary_slug)
            .map(|attribute| attribute.slug.clone())
            .collect();
        let has_primary = attributes
            .iter()
            .any(|attribute| attribute.slug == self.primary_slug);

        let mut counts = self.counts_for(&other_slugs, &base).await?;
        if has_primary {
            counts.extend(
                self.counts_for(std::slice::from_ref(&self.primary_slug), &primary_base)
                    .await?,
            );
        }

        Ok(assemble_facets(
            attributes,
            &counts,
            filters,
            &self.primary_slug,
        ))
    }

    async fn counts_for(
        &self,
        slugs: &[String],
        selection: &Selection,
    ) -> Result<Vec<ValueCount>, CatalogError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        self.resolver.value_counts(slugs, selection).await
    }
}

/// Apply visibility and ordering to raw counts.
///
/// `attributes` must already be limited to the ones that may be shown.
pub fn assemble_facets(
    mut attributes: Vec<AttributeRecord>,
    counts: &[ValueCount],
    filters: &ActiveFilters,
    primary_slug: &str,
) -> Vec<Facet> {
    attributes.sort_by(|a, b| {
        let a_primary = a.slug == primary_slug;
        let b_primary = b.slug == primary_slug;
        b_primary
            .cmp(&a_primary)
            .then_with(|| a.sort_order.cmp(&b.sort_order))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.slug.cmp(&b.slug))
    });

    attributes
        .into_iter()
        .filter_map(|attribute| {
            let is_primary = attribute.slug == primary_slug;
            let values = facet_values(&attribute.slug, counts, filters, is_primary);
            (is_primary || !values.is_empty()).then_some(Facet {
                name: attribute.name,
                slug: attribute.slug,
                values,
            })
        })
        .collect()
}

fn facet_values(
    slug: &str,
    counts: &[ValueCount],
    filters: &ActiveFilters,
    is_primary: bool,
) -> Vec<FacetValue> {
    let mut values: Vec<FacetValue> = counts
        .iter()
        .filter(|count| count.slug == slug)
        .map(|count| FacetValue {
            value: count.display.clone(),
            count: count.count,
            active: filters.is_active(slug, &count.display),
        })
        .filter(|value| is_primary || value.count > 0 || value.active)
        .collect();

    // Selected values the catalog does not know about stay visible so they can
    // be deselected.
    if let Some(selected) = filters.get(slug) {
        for raw in selected {
            let canonical = canonical_value(raw);
            let known = values
                .iter()
                .any(|value| canonical_value(&value.value) == canonical);
            if !known {
                values.push(FacetValue {
                    value: raw.clone(),
                    count: 0,
                    active: true,
                });
            }
        }
    }

    // Both sorts are stable: actives keep the value order of the first pass,
    // whatever order they were selected in.
    values.sort_by(|a, b| a.value.cmp(&b.value));
    values.sort_by(|a, b| match (a.active, b.active) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => Ordering::Equal,
        (false, false) => b.count.cmp(&a.count),
    });
    values
}
