//! Query-string decoding for catalog requests.
//!
//! `filter[...]` keys use PHP-style bracket syntax, which `serde_urlencoded`
//! cannot express, so the raw pairs are decoded here once.

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::domain::error::FilterError;
use crate::domain::filters::ActiveFilters;

const FILTER_KEY: &str = "filter";

#[derive(Debug, Clone)]
pub struct CatalogQuery {
    /// Every non-filter parameter; a repeated key keeps its last value.
    pub params: BTreeMap<String, String>,
    pub filters: Result<ActiveFilters, FilterError>,
}

impl CatalogQuery {
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(raw.unwrap_or("").as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let params = pairs
            .iter()
            .filter(|(key, _)| !is_filter_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let filters = ActiveFilters::from_query_pairs(
            pairs
                .iter()
                .filter(|(key, _)| is_filter_key(key))
                .map(|(key, value)| (key.as_str(), value.as_str())),
        );

        Self { params, filters }
    }

    /// Lenient unsigned integer parameter: absent, negative or malformed
    /// values read as `None` and fall back to defaults downstream.
    pub fn number(&self, key: &str) -> Option<u32> {
        self.params
            .get(key)
            .and_then(|value| value.trim().parse::<u32>().ok())
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Filters as far as they could be parsed, for error echoes.
    pub fn filters_for_echo(&self) -> ActiveFilters {
        self.filters.clone().unwrap_or_default()
    }
}

fn is_filter_key(key: &str) -> bool {
    key == FILTER_KEY
        || key
            .strip_prefix(FILTER_KEY)
            .is_some_and(|rest| rest.starts_with('['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_filters_from_plain_parameters() {
        let query = CatalogQuery::parse(Some(
            "page=2&limit=5&sort_by=price_desc&filter%5Bbrend%5D=Acme&filter[color][]=red&filter[color][]=Blue",
        ));

        assert_eq!(query.number("page"), Some(2));
        assert_eq!(query.number("limit"), Some(5));
        assert_eq!(query.text("sort_by"), Some("price_desc"));
        let filters = query.filters.expect("filters");
        assert_eq!(filters.get("brend"), Some(&["Acme".to_string()][..]));
        assert_eq!(
            filters.get("color"),
            Some(&["red".to_string(), "Blue".to_string()][..])
        );
    }

    #[test]
    fn malformed_numbers_read_as_absent() {
        let query = CatalogQuery::parse(Some("page=-1&limit=abc"));
        assert_eq!(query.number("page"), None);
        assert_eq!(query.number("limit"), None);
        assert!(query.filters.expect("filters").is_empty());
    }

    #[test]
    fn nested_filters_are_rejected() {
        let query = CatalogQuery::parse(Some("filter[brend][name]=Acme"));
        assert_eq!(
            query.filters,
            Err(FilterError::Nested {
                slug: "brend".to_string()
            })
        );
        assert!(query.filters_for_echo().is_empty());
    }

    #[test]
    fn missing_query_means_no_filters() {
        let query = CatalogQuery::parse(None);
        assert!(query.params.is_empty());
        assert!(query.filters.expect("filters").is_empty());
    }
}
