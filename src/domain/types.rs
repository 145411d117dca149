//! Shared domain enumerations and identifiers.

use serde::{Deserialize, Serialize};

/// Externally assigned product identifier.
pub type ProductId = i64;

/// Reserved id standing in for "no product matched" wherever a selection has
/// to be flattened to a list of ids. Never a valid product id.
pub const NO_MATCH_SENTINEL: ProductId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    IdAsc,
    PriceAsc,
    PriceDesc,
}

impl ProductSort {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductSort::IdAsc => "id_asc",
            ProductSort::PriceAsc => "price_asc",
            ProductSort::PriceDesc => "price_desc",
        }
    }

    /// Unknown or missing sort keys fall back to id order.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("price_asc") => ProductSort::PriceAsc,
            Some("price_desc") => ProductSort::PriceDesc,
            _ => ProductSort::IdAsc,
        }
    }
}

/// Which backend answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Mirror,
    Store,
}
