//! In-memory cached sequence allocator.
//!
//! One atomic counter per named sequence, primed from the authoritative
//! store on first touch. `allocate` is a lock-free increment; the dirty-set
//! write-back on commit holds no lock that allocators contend on.

use std::mem;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::error::Result;

/// Authoritative persistence for named sequence counters, implemented by
/// the storage engine. `advance_to` must only ever move the stored value
/// forward; a transient serialization failure surfaces as
/// `TernError::Conflict` and is retried by the caller's transaction, not
/// here.
pub trait SequenceStore: Send + Sync {
    /// Current persisted value of `sequence` (0 for a never-seen name).
    fn load(&self, sequence: &str) -> Result<i64>;

    /// Pushes the persisted value of `sequence` forward to at least `value`.
    fn advance_to(&self, sequence: &str, value: i64) -> Result<()>;
}

/// Identifier allocator backed by in-memory counters with batched
/// write-back. Ids are unique within the authoritative store's scope.
pub struct SequenceAllocator {
    store: Arc<dyn SequenceStore>,
    slots: RwLock<FxHashMap<String, Arc<AtomicI64>>>,
    dirty: Mutex<FxHashSet<String>>,
}

impl SequenceAllocator {
    pub fn new(store: Arc<dyn SequenceStore>) -> Self {
        Self {
            store,
            slots: RwLock::new(FxHashMap::default()),
            dirty: Mutex::new(FxHashSet::default()),
        }
    }

    fn slot(&self, sequence: &str) -> Result<Arc<AtomicI64>> {
        if let Some(slot) = self.slots.read().get(sequence) {
            return Ok(Arc::clone(slot));
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(sequence) {
            return Ok(Arc::clone(slot));
        }
        // First touch of this sequence: prime from the store exactly once.
        let current = self.store.load(sequence)?;
        debug!(sequence, current, "sequence.primed");
        let slot = Arc::new(AtomicI64::new(current));
        slots.insert(sequence.to_string(), Arc::clone(&slot));
        Ok(slot)
    }
}

impl super::IdAllocator for SequenceAllocator {
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn allocate(&self, sequence: &str) -> Result<i64> {
        let slot = self.slot(sequence)?;
        let id = slot.fetch_add(1, Ordering::SeqCst) + 1;
        self.dirty.lock().insert(sequence.to_string());
        Ok(id)
    }

    /// Writes back only the sequences touched since the last commit. The
    /// dirty set is swapped out first so concurrent `allocate` calls are
    /// never blocked behind store I/O; on failure the drained names are
    /// restored so a retried transaction re-persists them.
    fn commit(&self) -> Result<()> {
        let drained = mem::take(&mut *self.dirty.lock());
        if drained.is_empty() {
            return Ok(());
        }
        let mut failure = None;
        {
            let slots = self.slots.read();
            for name in &drained {
                let Some(slot) = slots.get(name) else { continue };
                let value = slot.load(Ordering::SeqCst);
                if let Err(err) = self.store.advance_to(name, value) {
                    failure = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failure {
            self.dirty.lock().extend(drained);
            return Err(err);
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        self.commit()
    }
}
