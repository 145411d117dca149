use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::import::ImportError,
    application::repos::RepoError,
    cache::MirrorError,
    domain::error::{DomainError, FilterError},
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Failures surfaced by the catalog engine.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("relational store unavailable")]
    StoreUnavailable(#[source] RepoError),
    #[error("cache mirror unavailable")]
    CacheUnavailable(#[source] MirrorError),
    #[error("invalid filter")]
    InvalidFilter(#[from] FilterError),
}

impl From<RepoError> for CatalogError {
    fn from(err: RepoError) -> Self {
        Self::StoreUnavailable(err)
    }
}

impl From<MirrorError> for CatalogError {
    fn from(err: MirrorError) -> Self {
        Self::CacheUnavailable(err)
    }
}

/// Process-level failure returned from `main`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
