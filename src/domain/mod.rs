//! Domain layer types and invariants.

pub mod entities;
pub mod error;
pub mod filters;
pub mod slug;
pub mod types;
