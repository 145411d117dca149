//! Full regeneration of the cache mirror from the relational store.
//!
//! A rebuild reads everything it needs first, so a store failure leaves the
//! previous mirror untouched. It then clears the mirror atomically and
//! repopulates it. Each attribute value is written as one atomic batch and
//! the readiness marker goes in last. Until the marker exists readers fall
//! back to the store.
//!
//! The marker holds a fresh generation id per rebuild. Result pages are only
//! written while the marker still holds the generation they were computed
//! under, so a page resolved against the previous mirror cannot outlive the
//! rebuild that replaced it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::error::CatalogError;
use crate::application::repos::CatalogRepo;
use crate::domain::entities::{AttributeRecord, CatalogStats, ValueMembership};
use crate::domain::types::ProductId;

use super::config::CacheConfig;
use super::keys;
use super::store::{MirrorOp, MirrorStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub generation: String,
    pub products: u64,
    pub values: u64,
    pub attributes: u64,
    pub cleared_keys: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

pub struct CacheRebuilder {
    repo: Arc<dyn CatalogRepo>,
    store: Arc<dyn MirrorStore>,
    config: CacheConfig,
    gate: Mutex<()>,
}

impl CacheRebuilder {
    pub fn new(repo: Arc<dyn CatalogRepo>, store: Arc<dyn MirrorStore>, config: CacheConfig) -> Self {
        Self {
            repo,
            store,
            config,
            gate: Mutex::new(()),
        }
    }

    /// Replace the mirror contents with the current relational state. Calls
    /// are serialized; a second caller waits and then rebuilds again.
    #[instrument(skip(self), target = "catalog::cache::rebuild")]
    pub async fn rebuild(&self) -> Result<RebuildReport, CatalogError> {
        let _guard = self.gate.lock().await;
        let started = Instant::now();
        let generation = Uuid::new_v4().simple().to_string();

        let product_ids = self.repo.all_product_ids().await?;
        let memberships = self.repo.value_memberships().await?;
        let attributes = self.repo.list_attributes().await?;
        let stats = self.repo.catalog_stats().await?;

        let cleared_keys = self.store.clear(&keys::REBUILD_CLEAR_PATTERNS).await?;

        self.write_all_products(&product_ids).await?;
        for membership in &memberships {
            self.store.apply(self.membership_ops(membership)).await?;
        }
        self.store.apply(attribute_registry_ops(&attributes)).await?;
        self.store.apply(self.catalog_stats_ops(&stats)).await?;
        self.store
            .apply(vec![MirrorOp::Put {
                key: keys::READY_MARKER.to_string(),
                value: generation.clone(),
            }])
            .await?;

        let elapsed = started.elapsed();
        counter!("catalog_rebuild_total").increment(1);
        histogram!("catalog_rebuild_ms").record(elapsed.as_secs_f64() * 1_000.0);

        let report = RebuildReport {
            generation,
            products: product_ids.len() as u64,
            values: memberships.len() as u64,
            attributes: attributes.len() as u64,
            cleared_keys,
            elapsed,
        };
        info!(
            target = "catalog::cache::rebuild",
            generation = %report.generation,
            products = report.products,
            values = report.values,
            attributes = report.attributes,
            cleared_keys = report.cleared_keys,
            elapsed_ms = elapsed.as_millis() as u64,
            backend = self.store.backend(),
            "Cache mirror rebuilt"
        );
        Ok(report)
    }

    async fn write_all_products(&self, ids: &[ProductId]) -> Result<(), CatalogError> {
        for chunk in ids.chunks(self.config.rebuild_batch_size.get()) {
            self.store
                .apply(vec![MirrorOp::SetAdd {
                    key: keys::ALL_PRODUCTS.to_string(),
                    members: chunk.iter().map(ToString::to_string).collect(),
                }])
                .await?;
        }
        Ok(())
    }

    fn membership_ops(&self, membership: &ValueMembership) -> Vec<MirrorOp> {
        let set_key = keys::value_set(&membership.slug, &membership.canonical);
        let stats_key = keys::value_stats(&membership.slug, &membership.canonical);

        let mut ops = vec![
            MirrorOp::Delete(set_key.clone()),
            MirrorOp::Delete(stats_key.clone()),
        ];
        for chunk in membership
            .product_ids
            .chunks(self.config.rebuild_batch_size.get())
        {
            ops.push(MirrorOp::SetAdd {
                key: set_key.clone(),
                members: chunk.iter().map(ToString::to_string).collect(),
            });
        }
        ops.push(MirrorOp::HashSet {
            key: stats_key.clone(),
            fields: vec![
                (
                    "count".to_string(),
                    membership.product_ids.len().to_string(),
                ),
                ("min_price".to_string(), membership.min_price.to_string()),
                ("max_price".to_string(), membership.max_price.to_string()),
            ],
        });
        ops.push(MirrorOp::Expire {
            key: stats_key,
            ttl: self.config.stats_ttl,
        });
        ops.push(MirrorOp::SetAdd {
            key: keys::known_values(&membership.slug),
            members: vec![membership.display.clone()],
        });
        ops
    }

    fn catalog_stats_ops(&self, stats: &CatalogStats) -> Vec<MirrorOp> {
        let mut ops = catalog_stats_fields(stats);
        ops.push(MirrorOp::Expire {
            key: keys::CATALOG_STATS.to_string(),
            ttl: self.config.stats_ttl,
        });
        ops
    }
}

fn attribute_registry_ops(attributes: &[AttributeRecord]) -> Vec<MirrorOp> {
    let fields: Vec<(String, String)> = attributes
        .iter()
        .filter_map(|attribute| {
            serde_json::to_string(attribute)
                .ok()
                .map(|json| (attribute.slug.clone(), json))
        })
        .collect();
    vec![
        MirrorOp::Delete(keys::ATTRIBUTE_REGISTRY.to_string()),
        MirrorOp::HashSet {
            key: keys::ATTRIBUTE_REGISTRY.to_string(),
            fields,
        },
    ]
}

/// Delete-and-write ops for the catalog statistics hash, without expiry.
pub(crate) fn catalog_stats_fields(stats: &CatalogStats) -> Vec<MirrorOp> {
    let mut fields = vec![(
        "total_products".to_string(),
        stats.total_products.to_string(),
    )];
    push_price(&mut fields, "min_price", stats.min_price);
    push_price(&mut fields, "max_price", stats.max_price);
    vec![
        MirrorOp::Delete(keys::CATALOG_STATS.to_string()),
        MirrorOp::HashSet {
            key: keys::CATALOG_STATS.to_string(),
            fields,
        },
    ]
}

pub(crate) fn push_price(fields: &mut Vec<(String, String)>, name: &str, price: Option<Decimal>) {
    if let Some(price) = price {
        fields.push((name.to_string(), price.to_string()));
    }
}
