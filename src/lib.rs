//! Faceted product catalog: filter resolution, facet counts, pagination and
//! the Redis mirror that keeps both fast.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
