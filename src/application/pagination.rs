//! Offset pagination and sort order over a resolved product selection.

use std::num::NonZeroU32;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::application::error::CatalogError;
use crate::application::index::Selection;
use crate::application::repos::CatalogRepo;
use crate::domain::entities::ProductRecord;
use crate::domain::types::ProductSort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: NonZeroU32,
    pub per_page: NonZeroU32,
}

impl PageRequest {
    /// Missing or zero values fall back to page 1 and `default_size`. Any
    /// positive size is taken as given.
    pub fn normalize(page: Option<u32>, per_page: Option<u32>, default_size: NonZeroU32) -> Self {
        let page = page.and_then(NonZeroU32::new).unwrap_or(NonZeroU32::MIN);
        let per_page = per_page.and_then(NonZeroU32::new).unwrap_or(default_size);
        Self { page, per_page }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.get() - 1) * u64::from(self.per_page.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u64,
}

impl PageMeta {
    pub fn new(request: PageRequest, total: u64) -> Self {
        Self {
            current_page: request.page.get(),
            per_page: request.per_page.get(),
            total,
            last_page: last_page(total, request.per_page),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductPage {
    pub data: Vec<ProductRecord>,
    pub meta: PageMeta,
}

impl ProductPage {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            data: Vec::new(),
            meta: PageMeta::new(request, 0),
        }
    }
}

/// `max(1, ceil(total / per_page))`.
pub fn last_page(total: u64, per_page: NonZeroU32) -> u64 {
    total.div_ceil(u64::from(per_page.get())).max(1)
}

pub struct ProductPager {
    repo: Arc<dyn CatalogRepo>,
}

impl ProductPager {
    pub fn new(repo: Arc<dyn CatalogRepo>) -> Self {
        Self { repo }
    }

    pub async fn page(
        &self,
        selection: &Selection,
        sort: ProductSort,
        request: PageRequest,
    ) -> Result<ProductPage, CatalogError> {
        let total = match selection {
            Selection::NoMatch => return Ok(ProductPage::empty(request)),
            Selection::All => self.repo.count_products().await?,
            Selection::Matched(ids) => ids.len() as u64,
        };

        let meta = PageMeta::new(request, total);
        let offset = request.offset();
        if offset >= total {
            return Ok(ProductPage {
                data: Vec::new(),
                meta,
            });
        }

        let scope = selection.to_id_list();
        let data = self
            .repo
            .list_products(
                scope.as_deref(),
                sort,
                u64::from(request.per_page.get()),
                offset,
            )
            .await?;

        Ok(ProductPage { data, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(value: u32) -> NonZeroU32 {
        NonZeroU32::new(value).expect("non-zero")
    }

    #[test]
    fn last_page_is_at_least_one() {
        assert_eq!(last_page(0, size(10)), 1);
        assert_eq!(last_page(10, size(10)), 1);
        assert_eq!(last_page(11, size(10)), 2);
        assert_eq!(last_page(25, size(5)), 5);
    }

    #[test]
    fn request_normalization_applies_defaults() {
        let request = PageRequest::normalize(None, None, size(10));
        assert_eq!(request.page.get(), 1);
        assert_eq!(request.per_page.get(), 10);

        let request = PageRequest::normalize(Some(0), Some(0), size(10));
        assert_eq!(request.page.get(), 1);
        assert_eq!(request.per_page.get(), 10);
    }

    #[test]
    fn large_page_sizes_are_taken_as_given() {
        let request = PageRequest::normalize(Some(3), Some(500), size(10));
        assert_eq!(request.per_page.get(), 500);
        assert_eq!(request.offset(), 1_000);
        assert_eq!(PageMeta::new(request, 1_200).per_page, 500);
    }

    #[test]
    fn empty_page_reports_single_last_page() {
        let page = ProductPage::empty(PageRequest::normalize(Some(4), Some(10), size(10)));
        assert!(page.data.is_empty());
        assert_eq!(page.meta.total, 0);
        assert_eq!(page.meta.last_page, 1);
        assert_eq!(page.meta.current_page, 4);
    }
}
