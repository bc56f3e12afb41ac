//! The triple-pattern result cache.
//!
//! Sits between query callers and the storage engine's pattern-match read
//! path. Mutations invalidate aggressively: correctness over precision.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::error::{Result, TernError};
use crate::model::{Statement, Term, TriplePattern};

use super::backend::{CacheBackend, CachedEntry};
use super::key::{CacheKey, WILDCARD_HASH};
use super::metrics::{CacheMetrics, CacheMetricsSnapshot};

/// Narrow read interface to the authoritative storage engine. `find`
/// streams every statement matching `pattern` into `sink`, in storage
/// order.
pub trait TripleSource {
    fn find(
        &self,
        pattern: &TriplePattern,
        sink: &mut dyn FnMut(Statement) -> Result<()>,
    ) -> Result<()>;
}

#[derive(Default)]
struct Staging {
    puts: FxHashMap<CacheKey, CachedEntry>,
    removes: FxHashSet<CacheKey>,
    clear: bool,
}

/// Transactionally-consistent cache of triple-pattern query results.
///
/// One handle mirrors one storage transaction at a time: writes between
/// `begin` and `commit` are staged locally and only reach the shared
/// backend on commit, so the backend never holds data the storage layer
/// rolled back. Outside a transaction, writes go straight through.
///
/// A failing backend degrades, never fails the caller: reads become
/// misses, writes are logged and dropped.
pub struct PatternCache {
    backend: Arc<dyn CacheBackend>,
    metrics: CacheMetrics,
    max_result_size: usize,
    staging: Mutex<Option<Staging>>,
}

impl PatternCache {
    pub fn new(backend: Arc<dyn CacheBackend>, max_result_size: usize) -> Self {
        Self {
            backend,
            metrics: CacheMetrics::default(),
            max_result_size,
            staging: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Starts mirroring a storage transaction. Fails if one is already
    /// active on this handle.
    pub fn begin(&self) -> Result<()> {
        let mut staging = self.staging.lock();
        if staging.is_some() {
            return Err(TernError::Invalid(
                "cache transaction already active".into(),
            ));
        }
        *staging = Some(Staging::default());
        Ok(())
    }

    /// Publishes staged writes to the shared backend. Backend failures are
    /// logged and swallowed; the storage commit they accompany has already
    /// happened.
    pub fn commit(&self) -> Result<()> {
        let Some(staged) = self.staging.lock().take() else {
            return Ok(());
        };
        if staged.clear {
            self.backend_write(self.backend.clear());
        }
        for key in &staged.removes {
            self.backend_write(self.backend.remove(key));
        }
        for (key, entry) in staged.puts {
            self.backend_write(self.backend.put(key, entry));
        }
        Ok(())
    }

    /// Discards staged writes, mirroring a storage rollback.
    pub fn rollback(&self) -> Result<()> {
        self.staging.lock().take();
        Ok(())
    }

    /// Drops any in-flight transaction state. Idempotent.
    pub fn close(&self) {
        self.staging.lock().take();
    }

    /// Returns the cached result for `pattern`, if any. A hash collision on
    /// the key is detected by comparing the stored pattern and treated as a
    /// miss.
    pub fn lookup(&self, pattern: &TriplePattern) -> Option<Arc<Vec<Statement>>> {
        let key = CacheKey::for_pattern(pattern);
        {
            let staging = self.staging.lock();
            if let Some(staged) = staging.as_ref() {
                if let Some(entry) = staged.puts.get(&key) {
                    if entry.pattern == *pattern {
                        self.metrics.hit();
                        return Some(Arc::clone(&entry.statements));
                    }
                }
                if staged.removes.contains(&key) || staged.clear {
                    self.metrics.miss();
                    return None;
                }
            }
        }
        match self.backend.get(&key) {
            Ok(Some(entry)) if entry.pattern == *pattern => {
                self.metrics.hit();
                Some(entry.statements)
            }
            Ok(Some(_)) => {
                trace!(?key, "cache.key_collision");
                self.metrics.miss();
                None
            }
            Ok(None) => {
                self.metrics.miss();
                None
            }
            Err(err) => {
                // Backing store unavailable: treat as a miss and fall
                // through to authoritative storage.
                warn!(error = %err, "cache.read_failed");
                self.metrics.backend_error();
                self.metrics.miss();
                None
            }
        }
    }

    /// Caches `statements` as the result of `pattern`.
    pub fn store(&self, pattern: &TriplePattern, statements: Arc<Vec<Statement>>) {
        let key = CacheKey::for_pattern(pattern);
        let entry = CachedEntry::new(pattern.clone(), statements);
        self.metrics.store();
        let mut staging = self.staging.lock();
        if let Some(staged) = staging.as_mut() {
            staged.removes.remove(&key);
            staged.puts.insert(key, entry);
        } else {
            drop(staging);
            self.backend_write(self.backend.put(key, entry));
        }
    }

    /// Cached read-through: on a miss the authoritative `source` is queried
    /// through a size-bounded buffering reader. Results within the bound
    /// are cached under the pattern's key, under each statement's
    /// fully-specific key, and, for a subject-only query, under one
    /// per-predicate sub-pattern each. An oversize result is returned
    /// uncached.
    pub fn read_through(
        &self,
        pattern: &TriplePattern,
        source: &dyn TripleSource,
    ) -> Result<Arc<Vec<Statement>>> {
        if let Some(hit) = self.lookup(pattern) {
            return Ok(hit);
        }
        let mut buffer = Vec::new();
        source.find(pattern, &mut |st| {
            buffer.push(st);
            Ok(())
        })?;

        if buffer.len() > self.max_result_size {
            // A huge scan would poison the cache; hand it through uncached.
            debug!(
                result_size = buffer.len(),
                max = self.max_result_size,
                "cache.result_too_large"
            );
            self.metrics.oversize_skip();
            return Ok(Arc::new(buffer));
        }

        let result = Arc::new(buffer);
        self.store(pattern, Arc::clone(&result));

        let inferred = pattern.include_inferred;
        for st in result.iter() {
            // Amortizes future point lookups for each returned statement.
            let specific = TriplePattern::new(
                Some(st.subject.clone()),
                Some(st.predicate.clone()),
                Some(st.object.clone()),
                st.graph.clone(),
                inferred,
            );
            if &specific != pattern {
                self.store(&specific, Arc::new(vec![st.clone()]));
            }
        }

        if pattern.is_subject_only() {
            // Anticipatory caching: a subject scan is usually followed by
            // per-property lookups on the same subject.
            let mut by_predicate: FxHashMap<Term, Vec<Statement>> = FxHashMap::default();
            for st in result.iter() {
                by_predicate
                    .entry(st.predicate.clone())
                    .or_default()
                    .push(st.clone());
            }
            for (predicate, group) in by_predicate {
                let sub = TriplePattern::new(
                    pattern.subject.clone(),
                    Some(predicate),
                    None,
                    pattern.graph.clone(),
                    inferred,
                );
                self.store(&sub, Arc::new(group));
            }
        }

        Ok(result)
    }

    /// Invalidates every key a mutation of (`subject`, `predicate`,
    /// `object`) over `graphs` could have populated: for the global scope
    /// plus each mutated context, all 8 bound/wildcard combinations, under
    /// both inferred flags. A mutation with any component unknown (bulk
    /// wildcard removal) clears the whole cache instead, since the affected
    /// key set cannot be enumerated.
    pub fn invalidate(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
        graphs: &[Term],
    ) {
        let (Some(s), Some(p), Some(o)) = (subject, predicate, object) else {
            self.invalidate_all();
            return;
        };
        let (s, p, o) = (s.key_hash(), p.key_hash(), o.key_hash());
        let mut graph_slots: SmallVec<[i32; 4]> = SmallVec::new();
        graph_slots.push(WILDCARD_HASH);
        graph_slots.extend(graphs.iter().map(Term::key_hash));

        let mut staging = self.staging.lock();
        for &graph in &graph_slots {
            for combo in 0..8u8 {
                for inferred in 0..2 {
                    let key = CacheKey {
                        subject: if combo & 1 != 0 { s } else { WILDCARD_HASH },
                        predicate: if combo & 2 != 0 { p } else { WILDCARD_HASH },
                        object: if combo & 4 != 0 { o } else { WILDCARD_HASH },
                        graph,
                        inferred,
                    };
                    self.metrics.invalidation();
                    if let Some(staged) = staging.as_mut() {
                        staged.puts.remove(&key);
                        staged.removes.insert(key);
                    } else {
                        self.backend_write(self.backend.remove(&key));
                    }
                }
            }
        }
    }

    /// Drops every cached entry. The fallback for bulk mutations whose
    /// affected pattern set is unknown ahead of time.
    pub fn invalidate_all(&self) {
        self.metrics.invalidation();
        let mut staging = self.staging.lock();
        if let Some(staged) = staging.as_mut() {
            staged.puts.clear();
            staged.removes.clear();
            staged.clear = true;
        } else {
            drop(staging);
            self.backend_write(self.backend.clear());
        }
    }

    /// A write-through failure must never fail the triple mutation it
    /// accompanies.
    fn backend_write(&self, outcome: Result<()>) {
        if let Err(err) = outcome {
            warn!(error = %err, "cache.write_failed");
            self.metrics.backend_error();
        }
    }
}
