//! Read-through caches kept in the mirror next to the filter sets: whole
//! product pages, catalog statistics and per-value statistics.
//!
//! Every entry carries an expiry and every rebuild clears them all.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use metrics::counter;
use rust_decimal::Decimal;

use crate::application::pagination::ProductPage;
use crate::domain::entities::{CatalogStats, ValueStats};
use crate::domain::filters::canonical_value;

use super::config::CacheConfig;
use super::error::MirrorError;
use super::keys;
use super::rebuild::{catalog_stats_fields, push_price};
use super::store::{MirrorOp, MirrorStore};

pub struct ResultCache {
    store: Arc<dyn MirrorStore>,
    config: CacheConfig,
}

impl ResultCache {
    pub fn new(store: Arc<dyn MirrorStore>, config: CacheConfig) -> Self {
        Self { store, config }
    }

    pub async fn page(&self, key: &str) -> Result<Option<ProductPage>, MirrorError> {
        let Some(raw) = self.store.get(key).await? else {
            counter!("catalog_result_cache_miss_total").increment(1);
            return Ok(None);
        };
        let page = serde_json::from_str(&raw)
            .map_err(|err| MirrorError::corrupt(key, err.to_string()))?;
        counter!("catalog_result_cache_hit_total").increment(1);
        Ok(Some(page))
    }

    /// Generation id of the rebuild that populated the mirror, if one
    /// completed and nothing has cleared it since.
    pub async fn generation(&self) -> Result<Option<String>, MirrorError> {
        self.store.get(keys::READY_MARKER).await
    }

    /// Cache `page` unless the mirror has been rebuilt (or is being rebuilt)
    /// since `generation` was read. Returns whether the page was written.
    pub async fn store_page(
        &self,
        key: &str,
        page: &ProductPage,
        generation: &str,
    ) -> Result<bool, MirrorError> {
        let raw =
            serde_json::to_string(page).map_err(|err| MirrorError::corrupt(key, err.to_string()))?;
        self.store
            .put_if_equal(
                keys::READY_MARKER,
                generation,
                key,
                &raw,
                self.config.result_ttl,
            )
            .await
    }

    pub async fn catalog_stats(&self) -> Result<Option<CatalogStats>, MirrorError> {
        let fields = self.store.hash_get_all(keys::CATALOG_STATS).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(CatalogStats {
            total_products: parse_count(keys::CATALOG_STATS, &fields, "total_products")?,
            min_price: parse_price(keys::CATALOG_STATS, &fields, "min_price")?,
            max_price: parse_price(keys::CATALOG_STATS, &fields, "max_price")?,
        }))
    }

    pub async fn store_catalog_stats(&self, stats: &CatalogStats) -> Result<(), MirrorError> {
        let mut ops = catalog_stats_fields(stats);
        ops.push(MirrorOp::Expire {
            key: keys::CATALOG_STATS.to_string(),
            ttl: self.config.stats_ttl,
        });
        self.store.apply(ops).await
    }

    pub async fn value_stats(
        &self,
        slug: &str,
        value: &str,
    ) -> Result<Option<ValueStats>, MirrorError> {
        let key = keys::value_stats(slug, &canonical_value(value));
        let fields = self.store.hash_get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(ValueStats {
            count: parse_count(&key, &fields, "count")?,
            min_price: parse_price(&key, &fields, "min_price")?,
            max_price: parse_price(&key, &fields, "max_price")?,
        }))
    }

    /// Only stats of values that exist are cached; a zero count would turn
    /// a typo into an hour of cached misses.
    pub async fn store_value_stats(
        &self,
        slug: &str,
        value: &str,
        stats: &ValueStats,
    ) -> Result<(), MirrorError> {
        if stats.count == 0 {
            return Ok(());
        }
        let key = keys::value_stats(slug, &canonical_value(value));
        let mut fields = vec![("count".to_string(), stats.count.to_string())];
        push_price(&mut fields, "min_price", stats.min_price);
        push_price(&mut fields, "max_price", stats.max_price);
        self.store
            .apply(vec![
                MirrorOp::Delete(key.clone()),
                MirrorOp::HashSet {
                    key: key.clone(),
                    fields,
                },
                MirrorOp::Expire {
                    key,
                    ttl: self.config.stats_ttl,
                },
            ])
            .await
    }

    /// Display values registered for `slug` by the last rebuild, sorted.
    pub async fn known_values(&self, slug: &str) -> Result<Vec<String>, MirrorError> {
        let mut values = self.store.members(&keys::known_values(slug)).await?;
        values.sort();
        Ok(values)
    }
}

fn parse_count(key: &str, fields: &HashMap<String, String>, name: &str) -> Result<u64, MirrorError> {
    match fields.get(name) {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|err| MirrorError::corrupt(key, format!("{name}: {err}"))),
    }
}

fn parse_price(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Decimal>, MirrorError> {
    fields
        .get(name)
        .map(|raw| {
            Decimal::from_str(raw).map_err(|err| MirrorError::corrupt(key, format!("{name}: {err}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pagination::{PageMeta, ProductPage};
    use crate::cache::MemoryMirror;

    fn cache() -> (Arc<MemoryMirror>, ResultCache) {
        let mirror = Arc::new(MemoryMirror::new());
        let cache = ResultCache::new(mirror.clone(), CacheConfig::default());
        (mirror, cache)
    }

    fn empty_page() -> ProductPage {
        ProductPage {
            data: Vec::new(),
            meta: PageMeta {
                current_page: 1,
                per_page: 10,
                total: 0,
                last_page: 1,
            },
        }
    }

    #[tokio::test]
    async fn pages_round_trip_through_the_mirror() {
        let (mirror, cache) = cache();
        let page = empty_page();
        mirror.put(keys::READY_MARKER, "g1", None).await.expect("marker");

        assert_eq!(cache.generation().await.expect("generation").as_deref(), Some("g1"));
        assert_eq!(cache.page("products:filtered:x").await.expect("get"), None);
        assert!(
            cache
                .store_page("products:filtered:x", &page, "g1")
                .await
                .expect("store")
        );
        assert_eq!(
            cache.page("products:filtered:x").await.expect("get"),
            Some(page)
        );
    }

    #[tokio::test]
    async fn pages_from_a_superseded_generation_are_dropped() {
        let (mirror, cache) = cache();
        mirror.put(keys::READY_MARKER, "g2", None).await.expect("marker");

        let written = cache
            .store_page("products:filtered:x", &empty_page(), "g1")
            .await
            .expect("store");
        assert!(!written);
        assert!(mirror.keys("products:filtered:*").is_empty());
    }

    #[tokio::test]
    async fn corrupt_pages_are_reported() {
        let (mirror, cache) = cache();
        mirror
            .put("products:filtered:bad", "{not json", None)
            .await
            .expect("put");

        let err = cache
            .page("products:filtered:bad")
            .await
            .expect_err("corrupt");
        assert!(matches!(err, MirrorError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn value_stats_use_canonical_keys() {
        let (mirror, cache) = cache();
        let stats = ValueStats {
            count: 2,
            min_price: Some(Decimal::new(1000, 2)),
            max_price: Some(Decimal::new(2500, 2)),
        };
        cache
            .store_value_stats("brend", " Acme ", &stats)
            .await
            .expect("store");

        assert!(
            mirror
                .exists("param:stats:products:param:brend:acme")
                .await
                .expect("exists")
        );
        assert_eq!(
            cache.value_stats("brend", "ACME").await.expect("get"),
            Some(stats)
        );
    }

    #[tokio::test]
    async fn zero_count_value_stats_are_not_cached() {
        let (mirror, cache) = cache();
        cache
            .store_value_stats("brend", "ghost", &ValueStats::default())
            .await
            .expect("store");
        assert!(mirror.keys("param:stats:*").is_empty());
    }
}
