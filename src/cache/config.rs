//! Cache configuration.
//!
//! Expiry and batching knobs shared by the mirror index, the rebuilder and
//! the read-through caches.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_STATS_TTL_SECS: u64 = 3_600;
const DEFAULT_RESULT_TTL_SECS: u64 = 3_600;
const DEFAULT_SCRATCH_TTL_SECS: u64 = 60;
const DEFAULT_REBUILD_BATCH_SIZE: usize = 1_000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiry of per-value and catalog statistics hashes.
    pub stats_ttl: Duration,
    /// Expiry of cached product pages.
    pub result_ttl: Duration,
    /// Backstop expiry of scratch sets created during resolution.
    pub scratch_ttl: Duration,
    /// Maximum members written per set command during a rebuild.
    pub rebuild_batch_size: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stats_ttl: Duration::from_secs(DEFAULT_STATS_TTL_SECS),
            result_ttl: Duration::from_secs(DEFAULT_RESULT_TTL_SECS),
            scratch_ttl: Duration::from_secs(DEFAULT_SCRATCH_TTL_SECS),
            rebuild_batch_size: NonZeroUsize::new(DEFAULT_REBUILD_BATCH_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            stats_ttl: settings.stats_ttl,
            result_ttl: settings.result_ttl,
            scratch_ttl: settings.scratch_ttl,
            rebuild_batch_size: settings.rebuild_batch_size,
        }
    }
}
