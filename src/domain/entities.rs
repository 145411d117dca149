//! Catalog records as read from the relational store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    pub description: Option<String>,
}

/// A filterable attribute ("parameter") such as brand or color.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub is_filterable: bool,
    pub sort_order: i32,
}

/// Every product linked to one (attribute, canonical value) pair, with the
/// price bounds of those products. Source material for a mirror rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMembership {
    pub slug: String,
    pub canonical: String,
    pub display: String,
    pub product_ids: Vec<ProductId>,
    pub min_price: Decimal,
    pub max_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueStats {
    pub count: u64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_products: u64,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

/// Count of distinct products per attribute value, keyed by canonical value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueCount {
    pub slug: String,
    pub canonical: String,
    pub display: String,
    pub count: u64,
}
