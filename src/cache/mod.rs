//! Triple-pattern result caching.

pub mod backend;
pub mod key;
pub mod metrics;
pub mod pattern;

pub use backend::{CacheBackend, CachedEntry, ShardedLruBackend};
pub use key::{CacheKey, WILDCARD_HASH};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use pattern::{PatternCache, TripleSource};

use std::sync::Arc;

use crate::config::Config;

/// Number of backend shards; matches typical core counts without tuning.
const DEFAULT_SHARDS: usize = 16;

/// Builds a pattern cache over the default sharded LRU backend, sized and
/// timed per `config`.
pub fn cache_from_config(config: &Config) -> PatternCache {
    let backend = Arc::new(ShardedLruBackend::new(
        DEFAULT_SHARDS,
        config.cache_max_entries,
        config.cache_lifespan,
        config.cache_max_idle,
    ));
    PatternCache::new(backend, config.cache_max_result_size)
}
