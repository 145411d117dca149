//! Application services layer.

pub mod catalog;
pub mod error;
pub mod facets;
pub mod import;
pub mod index;
pub mod pagination;
pub mod repos;
pub mod resolver;
