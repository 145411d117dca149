//! In-memory relational store used by the integration tests.
//!
//! Mirrors the Postgres adapter's semantics: canonical (trimmed, lowercased)
//! value matching, `MIN` display spelling per canonical value, and id
//! tie-breaks on price sorts.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use catalog::application::catalog::CatalogService;
use catalog::application::index::{ProductIndex, StoreIndex};
use catalog::application::repos::{
    AttributeUsage, CatalogRepo, CatalogWriteRepo, ImportSummary, PreparedOffer, RepoError,
};
use catalog::application::resolver::FilterResolver;
use catalog::cache::{
    CacheConfig, CacheRebuilder, MemoryMirror, MirrorError, MirrorIndex, MirrorOp, MirrorStore,
    ResultCache,
};
use catalog::config::CatalogSettings;
use catalog::domain::entities::{
    AttributeRecord, CatalogStats, ProductRecord, ValueCount, ValueMembership, ValueStats,
};
use catalog::domain::filters::{ActiveFilters, canonical_value};
use catalog::domain::types::{ProductId, ProductSort};

#[derive(Default)]
struct State {
    products: BTreeMap<ProductId, ProductRecord>,
    attributes: BTreeMap<String, AttributeRecord>,
    /// product id -> (slug, raw value)
    links: BTreeMap<ProductId, Vec<(String, String)>>,
    next_attribute_id: i64,
}

impl State {
    fn ensure_attribute(&mut self, slug: &str, name: &str) {
        if !self.attributes.contains_key(slug) {
            self.next_attribute_id += 1;
            self.attributes.insert(
                slug.to_string(),
                AttributeRecord {
                    id: self.next_attribute_id,
                    name: name.to_string(),
                    slug: slug.to_string(),
                    is_filterable: true,
                    sort_order: 0,
                },
            );
        }
    }

    /// (slug, canonical) -> (display, product ids)
    fn groups(&self) -> BTreeMap<(String, String), (String, BTreeSet<ProductId>)> {
        let mut groups: BTreeMap<(String, String), (String, BTreeSet<ProductId>)> =
            BTreeMap::new();
        for (product_id, links) in &self.links {
            for (slug, raw) in links {
                let display = raw.trim().to_string();
                let entry = groups
                    .entry((slug.clone(), canonical_value(raw)))
                    .or_insert_with(|| (display.clone(), BTreeSet::new()));
                if display < entry.0 {
                    entry.0 = display;
                }
                entry.1.insert(*product_id);
            }
        }
        groups
    }

    fn price_bounds(&self, ids: &BTreeSet<ProductId>) -> (Option<Decimal>, Option<Decimal>) {
        let prices = ids
            .iter()
            .filter_map(|id| self.products.get(id))
            .map(|product| product.price);
        prices.fold((None, None), |(min, max), price| {
            (
                Some(min.map_or(price, |current: Decimal| current.min(price))),
                Some(max.map_or(price, |current: Decimal| current.max(price))),
            )
        })
    }
}

/// Relational store double. `set_available(false)` makes every call fail
/// the way an unreachable database would.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<State>,
    offline: AtomicBool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub async fn add_attribute(&self, slug: &str, name: &str, sort_order: i32, filterable: bool) {
        let mut state = self.state.lock().await;
        state.ensure_attribute(slug, name);
        if let Some(attribute) = state.attributes.get_mut(slug) {
            attribute.name = name.to_string();
            attribute.sort_order = sort_order;
            attribute.is_filterable = filterable;
        }
    }

    pub async fn add_product(&self, id: ProductId, name: &str, price: &str, params: &[(&str, &str)]) {
        let mut state = self.state.lock().await;
        state.products.insert(
            id,
            ProductRecord {
                id,
                name: name.to_string(),
                price: Decimal::from_str(price).expect("test price"),
                description: None,
            },
        );
        let mut links = Vec::new();
        for (slug, value) in params {
            state.ensure_attribute(slug, slug);
            links.push((slug.to_string(), value.to_string()));
        }
        state.links.insert(id, links);
    }

    pub async fn remove_product(&self, id: ProductId) {
        let mut state = self.state.lock().await;
        state.products.remove(&id);
        state.links.remove(&id);
    }

    fn check(&self) -> Result<(), RepoError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RepoError::from_persistence("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogRepo for MemoryCatalog {
    async fn list_attributes(&self) -> Result<Vec<AttributeRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut attributes: Vec<AttributeRecord> = state
            .attributes
            .values()
            .filter(|attribute| attribute.is_filterable)
            .cloned()
            .collect();
        attributes.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.slug.cmp(&b.slug))
        });
        Ok(attributes)
    }

    async fn all_product_ids(&self) -> Result<Vec<ProductId>, RepoError> {
        self.check()?;
        Ok(self.state.lock().await.products.keys().copied().collect())
    }

    async fn count_products(&self) -> Result<u64, RepoError> {
        self.check()?;
        Ok(self.state.lock().await.products.len() as u64)
    }

    async fn resolve_filters(&self, filters: &ActiveFilters) -> Result<Vec<ProductId>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut matched: Option<BTreeSet<ProductId>> = None;
        for (slug, _) in filters.iter() {
            let wanted = filters.canonical_values(slug);
            if wanted.is_empty() {
                continue;
            }
            let ids: BTreeSet<ProductId> = state
                .links
                .iter()
                .filter(|(_, links)| {
                    links.iter().any(|(link_slug, raw)| {
                        link_slug == slug && wanted.contains(&canonical_value(raw))
                    })
                })
                .map(|(id, _)| *id)
                .collect();
            matched = Some(match matched {
                None => ids,
                Some(current) => current.intersection(&ids).copied().collect(),
            });
        }
        Ok(match matched {
            Some(ids) => ids.into_iter().collect(),
            None => state.products.keys().copied().collect(),
        })
    }

    async fn value_counts(
        &self,
        slugs: &[String],
        scope: Option<&[ProductId]>,
    ) -> Result<Vec<ValueCount>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let scope: Option<BTreeSet<ProductId>> = scope.map(|ids| ids.iter().copied().collect());
        Ok(state
            .groups()
            .into_iter()
            .filter(|((slug, _), _)| slugs.contains(slug))
            .map(|((slug, canonical), (display, ids))| ValueCount {
                slug,
                canonical,
                display,
                count: match scope.as_ref() {
                    None => ids.len() as u64,
                    Some(scope) => ids.intersection(scope).count() as u64,
                },
            })
            .collect())
    }

    async fn list_products(
        &self,
        scope: Option<&[ProductId]>,
        sort: ProductSort,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ProductRecord>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut products: Vec<ProductRecord> = state
            .products
            .values()
            .filter(|product| scope.is_none_or(|ids| ids.contains(&product.id)))
            .cloned()
            .collect();
        match sort {
            ProductSort::IdAsc => products.sort_by_key(|product| product.id),
            ProductSort::PriceAsc => {
                products.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)))
            }
            ProductSort::PriceDesc => {
                products.sort_by(|a, b| b.price.cmp(&a.price).then(b.id.cmp(&a.id)))
            }
        }
        Ok(products
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn value_memberships(&self) -> Result<Vec<ValueMembership>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        Ok(state
            .groups()
            .into_iter()
            .map(|((slug, canonical), (display, ids))| {
                let (min_price, max_price) = state.price_bounds(&ids);
                ValueMembership {
                    slug,
                    canonical,
                    display,
                    product_ids: ids.into_iter().collect(),
                    min_price: min_price.unwrap_or_default(),
                    max_price: max_price.unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn catalog_stats(&self) -> Result<CatalogStats, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let ids: BTreeSet<ProductId> = state.products.keys().copied().collect();
        let (min_price, max_price) = state.price_bounds(&ids);
        Ok(CatalogStats {
            total_products: ids.len() as u64,
            min_price,
            max_price,
        })
    }

    async fn value_stats(&self, slug: &str, value: &str) -> Result<ValueStats, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let ids = state
            .groups()
            .remove(&(slug.to_string(), canonical_value(value)))
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        let (min_price, max_price) = state.price_bounds(&ids);
        Ok(ValueStats {
            count: ids.len() as u64,
            min_price,
            max_price,
        })
    }

    async fn known_values(&self, slug: &str) -> Result<Vec<String>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut values: Vec<String> = state
            .groups()
            .into_iter()
            .filter(|((group_slug, _), _)| group_slug == slug)
            .map(|(_, (display, _))| display)
            .collect();
        values.sort();
        Ok(values)
    }

    async fn attribute_usage(&self, limit: u32) -> Result<Vec<AttributeUsage>, RepoError> {
        self.check()?;
        let state = self.state.lock().await;
        let mut usage: BTreeMap<String, (BTreeSet<ProductId>, BTreeSet<String>)> = BTreeMap::new();
        for ((slug, canonical), (_, ids)) in state.groups() {
            let entry = usage.entry(slug).or_default();
            entry.0.extend(ids);
            entry.1.insert(canonical);
        }
        let mut rows: Vec<AttributeUsage> = usage
            .into_iter()
            .map(|(slug, (products, values))| AttributeUsage {
                name: state
                    .attributes
                    .get(&slug)
                    .map(|attribute| attribute.name.clone())
                    .unwrap_or_else(|| slug.clone()),
                slug,
                products: products.len() as u64,
                values: values.len() as u64,
            })
            .collect();
        rows.sort_by(|a, b| b.products.cmp(&a.products).then_with(|| a.slug.cmp(&b.slug)));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        self.check()
    }
}

#[async_trait]
impl CatalogWriteRepo for MemoryCatalog {
    async fn import_offers(&self, offers: &[PreparedOffer]) -> Result<ImportSummary, RepoError> {
        self.check()?;
        let mut state = self.state.lock().await;
        let mut parameters = BTreeSet::new();
        let mut values = BTreeSet::new();
        let mut links = 0u64;

        for offer in offers {
            state.products.insert(
                offer.id,
                ProductRecord {
                    id: offer.id,
                    name: offer.name.clone(),
                    price: offer.price,
                    description: offer.description.clone(),
                },
            );
            let mut product_links: Vec<(String, String)> = Vec::new();
            for parameter in &offer.parameters {
                state.ensure_attribute(&parameter.slug, &parameter.name);
                parameters.insert(parameter.slug.clone());
                values.insert((parameter.slug.clone(), parameter.value.clone()));
                let link = (parameter.slug.clone(), parameter.value.clone());
                if !product_links.contains(&link) {
                    product_links.push(link);
                    links += 1;
                }
            }
            state.links.insert(offer.id, product_links);
        }

        Ok(ImportSummary {
            products: offers.len() as u64,
            parameters: parameters.len() as u64,
            values: values.len() as u64,
            links,
        })
    }
}

/// Everything a test needs to drive the engine end to end.
pub struct Harness {
    pub store: Arc<MemoryCatalog>,
    pub mirror: Arc<MemoryMirror>,
    pub rebuilder: Arc<CacheRebuilder>,
    pub resolver: Arc<FilterResolver>,
    pub catalog: Arc<CatalogService>,
}

impl Harness {
    pub fn new(store: Arc<MemoryCatalog>) -> Self {
        Self::with_settings(store, CatalogSettings::default())
    }

    pub fn with_settings(store: Arc<MemoryCatalog>, settings: CatalogSettings) -> Self {
        let mirror = Arc::new(MemoryMirror::new());
        Self::build(store, mirror.clone(), mirror, settings)
    }

    /// Engine that talks to `facade` while `mirror` stays inspectable.
    pub fn over_mirror(
        store: Arc<MemoryCatalog>,
        mirror: Arc<MemoryMirror>,
        facade: Arc<dyn MirrorStore>,
    ) -> Self {
        Self::build(store, mirror, facade, CatalogSettings::default())
    }

    fn build(
        store: Arc<MemoryCatalog>,
        mirror: Arc<MemoryMirror>,
        facade: Arc<dyn MirrorStore>,
        settings: CatalogSettings,
    ) -> Self {
        let config = CacheConfig::default();
        let repo: Arc<dyn CatalogRepo> = store.clone();

        let store_index: Arc<dyn ProductIndex> = Arc::new(StoreIndex::new(repo.clone()));
        let mirror_index: Arc<dyn ProductIndex> =
            Arc::new(MirrorIndex::new(facade.clone(), config.scratch_ttl));
        let resolver = Arc::new(FilterResolver::new(store_index, Some(mirror_index)));
        let results = ResultCache::new(facade.clone(), config.clone());
        let catalog = Arc::new(CatalogService::new(
            repo.clone(),
            resolver.clone(),
            Some(results),
            settings,
        ));
        let rebuilder = Arc::new(CacheRebuilder::new(repo, facade, config));

        Self {
            store,
            mirror,
            rebuilder,
            resolver,
            catalog,
        }
    }

    /// A resolver that only ever asks the relational store.
    pub fn store_only_resolver(&self) -> FilterResolver {
        let repo: Arc<dyn CatalogRepo> = self.store.clone();
        FilterResolver::new(Arc::new(StoreIndex::new(repo)), None)
    }
}

/// Mirror wrapper that fails chosen operations, yields inside write
/// batches, or runs a rebuild right before the next guarded write.
pub struct HookedMirror {
    inner: Arc<MemoryMirror>,
    failing: std::sync::Mutex<BTreeSet<&'static str>>,
    yield_in_batches: AtomicBool,
    rebuild_before_guarded_put: Mutex<Option<Arc<CacheRebuilder>>>,
}

impl HookedMirror {
    pub fn new(inner: Arc<MemoryMirror>) -> Self {
        Self {
            inner,
            failing: std::sync::Mutex::new(BTreeSet::new()),
            yield_in_batches: AtomicBool::new(false),
            rebuild_before_guarded_put: Mutex::new(None),
        }
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.lock().expect("failing ops").insert(op);
    }

    pub fn yield_in_batches(&self) {
        self.yield_in_batches.store(true, Ordering::SeqCst);
    }

    pub async fn rebuild_before_next_guarded_put(&self, rebuilder: Arc<CacheRebuilder>) {
        *self.rebuild_before_guarded_put.lock().await = Some(rebuilder);
    }

    fn check(&self, op: &'static str) -> Result<(), MirrorError> {
        if self.failing.lock().expect("failing ops").contains(op) {
            return Err(MirrorError::unavailable(op, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for HookedMirror {
    fn backend(&self) -> &'static str {
        "hooked"
    }

    async fn ping(&self) -> Result<(), MirrorError> {
        self.check("ping")?;
        self.inner.ping().await
    }

    async fn exists(&self, key: &str) -> Result<bool, MirrorError> {
        self.check("exists")?;
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        self.check("get")?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), MirrorError> {
        self.check("put")?;
        self.inner.put(key, value, ttl).await
    }

    async fn put_if_equal(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, MirrorError> {
        self.check("put_if_equal")?;
        let armed = self.rebuild_before_guarded_put.lock().await.take();
        if let Some(rebuilder) = armed {
            rebuilder
                .rebuild()
                .await
                .map_err(|err| MirrorError::unavailable("put_if_equal", err.to_string()))?;
        }
        self.inner.put_if_equal(guard_key, expected, key, value, ttl).await
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, MirrorError> {
        self.check("members")?;
        self.inner.members(key).await
    }

    async fn members_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, MirrorError> {
        self.check("members_many")?;
        self.inner.members_many(keys).await
    }

    async fn cardinalities(&self, keys: &[String]) -> Result<Vec<u64>, MirrorError> {
        self.check("cardinalities")?;
        self.inner.cardinalities(keys).await
    }

    async fn intersect_cardinalities(
        &self,
        base: &str,
        keys: &[String],
    ) -> Result<Vec<u64>, MirrorError> {
        self.check("intersect_cardinalities")?;
        self.inner.intersect_cardinalities(base, keys).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, MirrorError> {
        self.check("hash_get_all")?;
        self.inner.hash_get_all(key).await
    }

    async fn union_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        self.check("union_store")?;
        self.inner.union_store(dest, keys, ttl).await
    }

    async fn intersect_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        self.check("intersect_store")?;
        self.inner.intersect_store(dest, keys, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<(), MirrorError> {
        self.check("delete")?;
        self.inner.delete(keys).await
    }

    async fn apply(&self, ops: Vec<MirrorOp>) -> Result<(), MirrorError> {
        self.check("apply")?;
        if self.yield_in_batches.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.apply(ops).await
    }

    async fn clear(&self, patterns: &[&str]) -> Result<u64, MirrorError> {
        self.check("clear")?;
        if self.yield_in_batches.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.clear(patterns).await
    }
}

/// Scenario A from the catalog contract: two products, two brands.
pub async fn scenario_a() -> Arc<MemoryCatalog> {
    let store = Arc::new(MemoryCatalog::new());
    store.add_attribute("brend", "Бренд", 0, true).await;
    store.add_product(1, "A", "100", &[("brend", "X")]).await;
    store.add_product(2, "B", "200", &[("brend", "Y")]).await;
    store
}

/// A richer catalog with colors and sizes for facet and parity checks.
pub async fn apparel() -> Arc<MemoryCatalog> {
    let store = Arc::new(MemoryCatalog::new());
    store.add_attribute("brend", "Бренд", 5, true).await;
    store.add_attribute("color", "Color", 1, true).await;
    store.add_attribute("size", "Size", 2, true).await;
    store.add_attribute("english_name", "English name", 0, true).await;
    store.add_attribute("internal", "Internal", 0, false).await;

    store
        .add_product(1, "Runner", "100.00", &[("brend", "Acme"), ("color", "Red"), ("size", "M"), ("english_name", "Runner")])
        .await;
    store
        .add_product(2, "Trail", "150.00", &[("brend", "Acme"), ("color", "blue"), ("size", "L")])
        .await;
    store
        .add_product(3, "Court", "150.00", &[("brend", "Zeta"), ("color", "Red"), ("size", "M"), ("internal", "x")])
        .await;
    store
        .add_product(4, "Road", "90.50", &[("brend", "Zeta"), ("color", " RED "), ("size", "S")])
        .await;
    store
        .add_product(5, "Peak", "210.00", &[("brend", "Nova"), ("color", "Green")])
        .await;
    store
}
