//! Cache backends: the storage-side of the pattern cache.
//!
//! The default backend is an in-process sharded LRU. Deployments sharing a
//! distributed cache service implement [`CacheBackend`] over that service;
//! the pattern cache treats a failing backend as a cache that misses.

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use rustc_hash::FxHasher;

use crate::error::Result;
use crate::model::{Statement, TriplePattern};

use super::key::CacheKey;

/// A cached query result: the statements that satisfied `pattern` when it
/// was stored, plus the pattern itself for structural verification on hit.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub pattern: TriplePattern,
    pub statements: Arc<Vec<Statement>>,
}

impl CachedEntry {
    pub fn new(pattern: TriplePattern, statements: Arc<Vec<Statement>>) -> Self {
        Self {
            pattern,
            statements,
        }
    }
}

/// Key/value operations the pattern cache needs from its backing store.
/// Implementations may block on contention; callers treat that as ordinary
/// I/O. Removing an absent key is a no-op, not an error.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>>;
    fn put(&self, key: CacheKey, entry: CachedEntry) -> Result<()>;
    fn remove(&self, key: &CacheKey) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

struct Slot {
    entry: CachedEntry,
    stored_at: Instant,
    last_access: Instant,
}

/// Sharded in-process LRU with independent lifespan and idle-timeout
/// expiry, both enforced lazily on read. A zero duration disables that
/// bound.
pub struct ShardedLruBackend {
    shards: Vec<Mutex<LruCache<CacheKey, Slot>>>,
    lifespan: Duration,
    max_idle: Duration,
}

impl ShardedLruBackend {
    pub fn new(shards: usize, max_entries: usize, lifespan: Duration, max_idle: Duration) -> Self {
        let shard_count = shards.max(1);
        let per_shard_cap = (max_entries / shard_count).max(1);
        let mut shard_vec = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shard_vec.push(Mutex::new(LruCache::new(
                NonZeroUsize::new(per_shard_cap).unwrap(),
            )));
        }
        Self {
            shards: shard_vec,
            lifespan,
            max_idle,
        }
    }

    fn shard_for(&self, key: &CacheKey) -> &Mutex<LruCache<CacheKey, Slot>> {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    fn expired(&self, slot: &Slot, now: Instant) -> bool {
        (self.lifespan > Duration::ZERO && now.duration_since(slot.stored_at) > self.lifespan)
            || (self.max_idle > Duration::ZERO
                && now.duration_since(slot.last_access) > self.max_idle)
    }
}

impl CacheBackend for ShardedLruBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedEntry>> {
        let mut shard = self.shard_for(key).lock();
        let now = Instant::now();
        match shard.get_mut(key) {
            Some(slot) if self.expired(slot, now) => {
                shard.pop(key);
                Ok(None)
            }
            Some(slot) => {
                slot.last_access = now;
                Ok(Some(slot.entry.clone()))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: CacheKey, entry: CachedEntry) -> Result<()> {
        let now = Instant::now();
        self.shard_for(&key).lock().put(
            key,
            Slot {
                entry,
                stored_at: now,
                last_access: now,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &CacheKey) -> Result<()> {
        self.shard_for(key).lock().pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().clear();
        }
        Ok(())
    }
}
