//! Catalog cache mirror.
//!
//! A denormalized key-value replica of the filter-relevant relational data:
//!
//! - **Value sets**: product ids per (attribute, canonical value)
//! - **Statistics**: per-value and catalog-wide counts and price bounds
//! - **Registries**: all products, known values per attribute, attribute records
//! - **Result cache**: serialized product pages per filter/sort/page tuple
//!
//! The mirror is only ever rebuilt in full ([`CacheRebuilder`]). Readers use
//! it through [`MirrorIndex`] once the readiness marker is present.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! backend = "redis"          # redis | memory | disabled
//! redis_url = "redis://127.0.0.1:6379"
//! stats_ttl_seconds = 3600
//! result_ttl_seconds = 3600
//! ```

mod config;
mod error;
mod index;
mod keys;
mod memory;
mod rebuild;
mod redis_store;
mod results;
mod store;

pub use config::CacheConfig;
pub use error::MirrorError;
pub use index::MirrorIndex;
pub use keys::{REBUILD_CLEAR_PATTERNS, READY_MARKER, result_page};
pub use memory::{MemoryMirror, MirrorValue};
pub use rebuild::{CacheRebuilder, RebuildReport};
pub use redis_store::RedisMirror;
pub use results::ResultCache;
pub use store::{MirrorOp, MirrorStore};
