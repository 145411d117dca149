//! Offer import: validate supplier offers, persist them in one transaction,
//! then rebuild the mirror from the committed state.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::application::error::CatalogError;
use crate::application::repos::{
    CatalogWriteRepo, ImportSummary, PreparedOffer, PreparedParameter, RepoError,
};
use crate::cache::{CacheRebuilder, RebuildReport};
use crate::domain::error::DomainError;
use crate::domain::slug::derive_slug;
use crate::domain::types::ProductId;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to parse offer document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to persist offers")]
    Repo(#[from] RepoError),
    #[error("offers were saved but the mirror rebuild failed")]
    Rebuild(#[source] CatalogError),
}

/// Scalar that suppliers send either quoted or bare.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn as_text(&self) -> String {
        match self {
            Scalar::Text(text) => text.trim().to_string(),
            Scalar::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OfferInput {
    pub id: Option<Scalar>,
    #[serde(default)]
    pub name: String,
    pub price: Option<Scalar>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OfferDocument {
    Wrapped { offers: Vec<OfferInput> },
    Bare(Vec<OfferInput>),
}

/// Parse a JSON document holding either an offer array or `{"offers": [...]}`.
pub fn parse_offers(raw: &str) -> Result<Vec<OfferInput>, ImportError> {
    let document: OfferDocument = serde_json::from_str(raw)?;
    Ok(match document {
        OfferDocument::Wrapped { offers } => offers,
        OfferDocument::Bare(offers) => offers,
    })
}

/// Normalize a supplier id: surrounding whitespace and leading zeros are
/// dropped and the result must be a positive integer.
pub fn parse_offer_id(raw: &str) -> Result<ProductId, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("offer id is empty"));
    }
    let digits = trimmed.trim_start_matches('0');
    if digits.is_empty() {
        return Err(DomainError::validation("offer id must be positive"));
    }
    let id: ProductId = digits
        .parse()
        .map_err(|_| DomainError::validation(format!("offer id `{trimmed}` is not an integer")))?;
    if id <= 0 {
        return Err(DomainError::validation("offer id must be positive"));
    }
    Ok(id)
}

pub fn prepare_offer(offer: &OfferInput) -> Result<PreparedOffer, DomainError> {
    let id = offer
        .id
        .as_ref()
        .ok_or_else(|| DomainError::validation("offer id is missing"))
        .and_then(|id| parse_offer_id(&id.as_text()))?;

    let name = offer.name.trim();
    if name.is_empty() {
        return Err(DomainError::validation(format!("offer {id} has no name")));
    }

    let raw_price = offer
        .price
        .as_ref()
        .map(Scalar::as_text)
        .ok_or_else(|| DomainError::validation(format!("offer {id} has no price")))?;
    let price = Decimal::from_str(&raw_price).map_err(|_| {
        DomainError::validation(format!("offer {id} price `{raw_price}` is not numeric"))
    })?;
    if price <= Decimal::ZERO {
        return Err(DomainError::validation(format!(
            "offer {id} price must be positive"
        )));
    }

    let mut parameters = Vec::with_capacity(offer.parameters.len());
    for parameter in &offer.parameters {
        let name = parameter.name.trim();
        let value = parameter.value.trim();
        if name.is_empty() || value.is_empty() {
            continue;
        }
        let slug = derive_slug(name).map_err(|err| {
            DomainError::validation(format!("offer {id} parameter `{name}`: {err}"))
        })?;
        parameters.push(PreparedParameter {
            slug,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    let description = offer
        .description
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string);

    Ok(PreparedOffer {
        id,
        name: name.to_string(),
        price,
        description,
        parameters,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedOffer {
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub summary: ImportSummary,
    pub skipped: Vec<SkippedOffer>,
    pub rebuild: Option<RebuildReport>,
}

pub struct ImportService {
    writer: Arc<dyn CatalogWriteRepo>,
    rebuilder: Option<Arc<CacheRebuilder>>,
}

impl ImportService {
    pub fn new(writer: Arc<dyn CatalogWriteRepo>, rebuilder: Option<Arc<CacheRebuilder>>) -> Self {
        Self { writer, rebuilder }
    }

    /// Persist every valid offer and, when `rebuild` is set and a mirror is
    /// configured, rebuild the mirror once the transaction has committed.
    /// Invalid offers are skipped and reported, never fatal.
    pub async fn import(
        &self,
        offers: &[OfferInput],
        rebuild: bool,
    ) -> Result<ImportReport, ImportError> {
        let mut prepared: BTreeMap<ProductId, PreparedOffer> = BTreeMap::new();
        let mut skipped = Vec::new();

        for (position, offer) in offers.iter().enumerate() {
            match prepare_offer(offer) {
                Ok(offer) => {
                    // A later occurrence of the same id replaces the earlier one.
                    prepared.insert(offer.id, offer);
                }
                Err(err) => {
                    warn!(
                        target = "catalog::application::import",
                        position,
                        error = %err,
                        "Skipping invalid offer"
                    );
                    skipped.push(SkippedOffer {
                        position,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let prepared: Vec<PreparedOffer> = prepared.into_values().collect();
        let summary = if prepared.is_empty() {
            ImportSummary::default()
        } else {
            self.writer.import_offers(&prepared).await?
        };

        info!(
            target = "catalog::application::import",
            products = summary.products,
            parameters = summary.parameters,
            values = summary.values,
            links = summary.links,
            skipped = skipped.len(),
            "Offers imported"
        );

        let rebuild = match (rebuild, self.rebuilder.as_ref()) {
            (true, Some(rebuilder)) => Some(rebuilder.rebuild().await.map_err(ImportError::Rebuild)?),
            _ => None,
        };

        Ok(ImportReport {
            summary,
            skipped,
            rebuild,
        })
    }

    pub async fn import_document(&self, raw: &str, rebuild: bool) -> Result<ImportReport, ImportError> {
        let offers = parse_offers(raw)?;
        self.import(&offers, rebuild).await
    }
}
