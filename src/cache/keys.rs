//! Mirror key layout.
//!
//! Keys are shared with other consumers of the same Redis database, so the
//! layout is a stable contract. Attribute values always appear in their
//! canonical (trimmed, lowercased) spelling.

use uuid::Uuid;

use crate::domain::types::ProductSort;

pub const ALL_PRODUCTS: &str = "all_products";
pub const CATALOG_STATS: &str = "catalog:stats";
pub const ATTRIBUTE_REGISTRY: &str = "catalog:attributes";
pub const READY_MARKER: &str = "catalog:ready";

const VALUE_SET_PREFIX: &str = "products:param:";
const VALUE_STATS_PREFIX: &str = "param:stats:";
const KNOWN_VALUES_PREFIX: &str = "param:values:";
const RESULT_PREFIX: &str = "products:filtered:";
const SCRATCH_UNION_PREFIX: &str = "temp:union:";
const SCRATCH_RESULT_PREFIX: &str = "temp:result:";

/// Everything a rebuild removes before repopulating. Scratch sets are left
/// alone: in-flight resolutions still own them and they expire on their own.
pub const REBUILD_CLEAR_PATTERNS: [&str; 8] = [
    "products:param:*",
    "products:filtered:*",
    "param:stats:*",
    "param:values:*",
    ALL_PRODUCTS,
    CATALOG_STATS,
    ATTRIBUTE_REGISTRY,
    READY_MARKER,
];

pub fn value_set(slug: &str, canonical: &str) -> String {
    format!("{VALUE_SET_PREFIX}{slug}:{canonical}")
}

pub fn value_stats(slug: &str, canonical: &str) -> String {
    format!("{VALUE_STATS_PREFIX}{}", value_set(slug, canonical))
}

pub fn known_values(slug: &str) -> String {
    format!("{KNOWN_VALUES_PREFIX}{slug}")
}

pub fn result_page(filter_digest: &str, sort: ProductSort, page: u32, per_page: u32) -> String {
    format!(
        "{RESULT_PREFIX}{filter_digest}:{}:{page}:{per_page}",
        sort.as_str()
    )
}

pub fn scratch_union() -> String {
    format!("{SCRATCH_UNION_PREFIX}{}", Uuid::new_v4().simple())
}

pub fn scratch_result() -> String {
    format!("{SCRATCH_RESULT_PREFIX}{}", Uuid::new_v4().simple())
}
