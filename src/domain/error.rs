use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Malformed filter input rejected at the request boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter attribute slug must not be empty")]
    EmptySlug,
    #[error("filter `{slug}` must be a string or a list of strings")]
    UnsupportedValue { slug: String },
    #[error("filter `{slug}` contains a nested map")]
    Nested { slug: String },
    #[error("filters must be a map of attribute slugs to values")]
    NotAMap,
}
