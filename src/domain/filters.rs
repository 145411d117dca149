//! Active filter combinations, normalized once at the request boundary.
//!
//! Values within one attribute are OR'ed and attributes are AND'ed. Matching
//! is case-insensitive: every comparison goes through [`canonical_value`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::error::FilterError;

const QUERY_PREFIX: &str = "filter";

/// Canonical spelling of an attribute value used for matching and cache keys.
pub fn canonical_value(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActiveFilters(BTreeMap<String, Vec<String>>);

impl ActiveFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by callers that already hold well-formed values.
    /// Empty slugs and blank values are skipped.
    pub fn with<S: AsRef<str>>(mut self, slug: &str, values: &[S]) -> Self {
        let slug = slug.trim();
        if slug.is_empty() {
            return self;
        }
        for value in values {
            self.insert_value(slug, value.as_ref());
        }
        self
    }

    /// Parse `filter[slug]=v`, `filter[slug][]=v` and `filter[slug][0]=v`
    /// pairs. A bare `filter` key carries a JSON object in the shape
    /// [`ActiveFilters::from_json`] accepts. Keys outside the `filter` family
    /// are ignored.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filters = Self::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            if key == QUERY_PREFIX {
                let document: Value =
                    serde_json::from_str(value.as_ref()).map_err(|_| FilterError::NotAMap)?;
                for (slug, values) in Self::from_json(&document)?.0 {
                    for value in values {
                        filters.insert_value(&slug, &value);
                    }
                }
                continue;
            }
            let Some(rest) = key
                .strip_prefix(QUERY_PREFIX)
                .and_then(|rest| rest.strip_prefix('['))
            else {
                continue;
            };
            let (slug, tail) = rest.split_once(']').ok_or(FilterError::NotAMap)?;
            if slug.trim().is_empty() {
                return Err(FilterError::EmptySlug);
            }
            if !is_list_suffix(tail) {
                return Err(FilterError::Nested {
                    slug: slug.trim().to_string(),
                });
            }
            filters.push(slug, value.as_ref())?;
        }
        Ok(filters)
    }

    /// Parse a JSON object mapping slugs to a string or an array of strings.
    /// Numbers are accepted and read as their decimal spelling.
    pub fn from_json(value: &Value) -> Result<Self, FilterError> {
        let object = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(object) => object,
            _ => return Err(FilterError::NotAMap),
        };

        let mut filters = Self::new();
        for (slug, raw) in object {
            if slug.trim().is_empty() {
                return Err(FilterError::EmptySlug);
            }
            match raw {
                Value::Null => {}
                Value::Array(items) => {
                    for item in items {
                        let text = scalar_text(slug, item)?;
                        filters.push(slug, &text)?;
                    }
                }
                Value::Object(_) => {
                    return Err(FilterError::Nested {
                        slug: slug.trim().to_string(),
                    });
                }
                other => {
                    let text = scalar_text(slug, other)?;
                    filters.push(slug, &text)?;
                }
            }
        }
        Ok(filters)
    }

    fn push(&mut self, slug: &str, value: &str) -> Result<(), FilterError> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(FilterError::EmptySlug);
        }
        self.insert_value(slug, value);
        Ok(())
    }

    /// `slug` must already be trimmed and non-empty.
    fn insert_value(&mut self, slug: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }

        let canonical = canonical_value(value);
        let values = self.0.entry(slug.to_string()).or_default();
        if !values.iter().any(|known| canonical_value(known) == canonical) {
            values.push(value.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(slug, values)| (slug.as_str(), values.as_slice()))
    }

    pub fn get(&self, slug: &str) -> Option<&[String]> {
        self.0.get(slug).map(Vec::as_slice)
    }

    pub fn contains_slug(&self, slug: &str) -> bool {
        self.0.contains_key(slug)
    }

    /// The same combination with one attribute removed.
    pub fn without(&self, slug: &str) -> Self {
        let mut copy = self.clone();
        copy.0.remove(slug);
        copy
    }

    /// Whether `value` is selected for `slug`, compared case-insensitively.
    pub fn is_active(&self, slug: &str, value: &str) -> bool {
        let canonical = canonical_value(value);
        self.get(slug).is_some_and(|values| {
            values
                .iter()
                .any(|selected| canonical_value(selected) == canonical)
        })
    }

    /// Canonical values selected for `slug`, deduplicated and sorted.
    pub fn canonical_values(&self, slug: &str) -> BTreeSet<String> {
        self.get(slug)
            .map(|values| values.iter().map(|value| canonical_value(value)).collect())
            .unwrap_or_default()
    }

    /// Stable digest of the combination. Filters differing only in value
    /// order or letter case share a digest; the empty set digests to `none`.
    pub fn digest(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }

        let mut hasher = Sha256::new();
        for slug in self.0.keys() {
            hasher.update(slug.as_bytes());
            hasher.update([0x1f]);
            for value in self.canonical_values(slug) {
                hasher.update(value.as_bytes());
                hasher.update([0x1e]);
            }
            hasher.update([0x1d]);
        }
        hex::encode(hasher.finalize())
    }
}

fn is_list_suffix(tail: &str) -> bool {
    if tail.is_empty() || tail == "[]" {
        return true;
    }
    tail.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .is_some_and(|index| !index.is_empty() && index.chars().all(|ch| ch.is_ascii_digit()))
}

fn scalar_text(slug: &str, value: &Value) -> Result<String, FilterError> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Object(_) => Err(FilterError::Nested {
            slug: slug.trim().to_string(),
        }),
        _ => Err(FilterError::UnsupportedValue {
            slug: slug.trim().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_pairs_accept_scalar_and_list_forms() {
        let filters = ActiveFilters::from_query_pairs([
            ("page", "2"),
            ("filter[brend]", "Acme"),
            ("filter[color][]", "Red"),
            ("filter[color][]", "Blue"),
            ("filter[size][0]", "XL"),
        ])
        .expect("filters");

        assert_eq!(filters.len(), 3);
        assert_eq!(filters.get("brend"), Some(&["Acme".to_string()][..]));
        assert_eq!(
            filters.get("color"),
            Some(&["Red".to_string(), "Blue".to_string()][..])
        );
        assert_eq!(filters.get("size"), Some(&["XL".to_string()][..]));
    }

    #[test]
    fn blank_values_and_duplicates_are_dropped() {
        let filters = ActiveFilters::from_query_pairs([
            ("filter[color][]", "red"),
            ("filter[color][]", " RED "),
            ("filter[size]", "   "),
        ])
        .expect("filters");

        assert_eq!(filters.get("color"), Some(&["red".to_string()][..]));
        assert!(!filters.contains_slug("size"));
    }

    #[test]
    fn nested_query_keys_are_rejected() {
        let err = ActiveFilters::from_query_pairs([("filter[color][shade]", "dark")])
            .expect_err("nested key");
        assert_eq!(
            err,
            FilterError::Nested {
                slug: "color".to_string()
            }
        );

        let err = ActiveFilters::from_query_pairs([("filter[]", "x")]).expect_err("empty slug");
        assert_eq!(err, FilterError::EmptySlug);

        let err = ActiveFilters::from_query_pairs([("filter", "x")]).expect_err("scalar");
        assert_eq!(err, FilterError::NotAMap);
    }

    #[test]
    fn json_filters_accept_strings_and_lists() {
        let filters = ActiveFilters::from_json(&json!({
            "brend": "Acme",
            "memory": [64, "128"],
            "color": []
        }))
        .expect("filters");

        assert_eq!(filters.len(), 2);
        assert_eq!(
            filters.get("memory"),
            Some(&["64".to_string(), "128".to_string()][..])
        );
    }

    #[test]
    fn json_filters_reject_malformed_shapes() {
        assert_eq!(
            ActiveFilters::from_json(&json!(["a"])).expect_err("array"),
            FilterError::NotAMap
        );
        assert_eq!(
            ActiveFilters::from_json(&json!({"color": {"a": "b"}})).expect_err("nested"),
            FilterError::Nested {
                slug: "color".to_string()
            }
        );
        assert_eq!(
            ActiveFilters::from_json(&json!({"color": [true]})).expect_err("bool"),
            FilterError::UnsupportedValue {
                slug: "color".to_string()
            }
        );
    }

    #[test]
    fn bare_filter_key_carries_a_json_object() {
        let filters = ActiveFilters::from_query_pairs([
            ("filter", r#"{"brend": ["Acme", "Zeta"], "size": "M"}"#),
            ("filter[color]", "Red"),
        ])
        .expect("filters");

        assert_eq!(filters.len(), 3);
        assert_eq!(
            filters.get("brend"),
            Some(&["Acme".to_string(), "Zeta".to_string()][..])
        );
        assert_eq!(filters.get("size"), Some(&["M".to_string()][..]));

        let err = ActiveFilters::from_query_pairs([("filter", r#"{"color": [true]}"#)])
            .expect_err("bool");
        assert_eq!(
            err,
            FilterError::UnsupportedValue {
                slug: "color".to_string()
            }
        );
    }

    #[test]
    fn builder_skips_blank_slugs() {
        let filters = ActiveFilters::new().with("  ", &["x"]).with("color", &["red"]);
        assert_eq!(filters.len(), 1);
        assert!(filters.contains_slug("color"));
    }

    #[test]
    fn activity_is_case_insensitive() {
        let filters = ActiveFilters::new().with("brend", &["Acme"]);
        assert!(filters.is_active("brend", "ACME"));
        assert!(!filters.is_active("brend", "Other"));
        assert!(!filters.is_active("color", "Acme"));
    }

    #[test]
    fn digest_ignores_order_and_case() {
        let left = ActiveFilters::new()
            .with("color", &["Red", "blue"])
            .with("brend", &["Acme"]);
        let right = ActiveFilters::new()
            .with("brend", &["acme"])
            .with("color", &["Blue", "red"]);

        assert_eq!(left.digest(), right.digest());
        assert_ne!(left.digest(), left.without("color").digest());
        assert_eq!(ActiveFilters::new().digest(), "none");
    }
}
