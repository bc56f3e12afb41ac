//! Identifier allocation strategies.
//!
//! Every new node or statement gets a 64-bit identifier exactly once, at
//! creation time. Strategies differ in uniqueness scope: the distributed
//! time-sequence strategy is unique across independently-running processes;
//! the others are unique within one authoritative store.

pub mod clock_sync;
pub mod flake;
pub mod sequence;
pub mod uuid_gen;

use std::sync::Arc;

use crate::config::{Config, IdStrategy};
use crate::error::Result;

pub use flake::FlakeAllocator;
pub use sequence::{SequenceAllocator, SequenceStore};
pub use uuid_gen::UuidAllocator;

/// Mints 64-bit identifiers for new nodes and statements.
///
/// Long-lived service object: construct once, `initialize` before first use,
/// `commit` in lockstep with the surrounding storage transaction, `shutdown`
/// on close. Safe for concurrent `allocate` calls.
pub trait IdAllocator: Send + Sync {
    /// Prepares internal state (primes counters, acquires synchronizer
    /// files). Must be called before `allocate`.
    fn initialize(&self) -> Result<()>;

    /// Returns the next identifier for `sequence`. Strategies with global
    /// uniqueness ignore the sequence name.
    fn allocate(&self, sequence: &str) -> Result<i64>;

    /// Persists any buffered allocator state. Called on transaction commit.
    /// A `Conflict` error means the caller should retry the surrounding
    /// transaction; the allocator does not retry internally.
    fn commit(&self) -> Result<()>;

    /// Releases durable resources (synchronizer lock files). Idempotent.
    fn shutdown(&self) -> Result<()>;
}

/// Builds the allocator selected by `config.id_strategy`.
///
/// The sequence store is only consulted by the memory-sequence strategy but
/// is accepted unconditionally so call sites do not branch on strategy.
pub fn allocator_from_config(
    config: &Config,
    store: Arc<dyn SequenceStore>,
) -> Result<Arc<dyn IdAllocator>> {
    Ok(match config.id_strategy {
        IdStrategy::DistributedTimeSequence => Arc::new(FlakeAllocator::new(config.worker_id)?),
        IdStrategy::MemorySequence => Arc::new(SequenceAllocator::new(store)),
        IdStrategy::UuidRandom => Arc::new(UuidAllocator::random()),
        IdStrategy::UuidTime => Arc::new(UuidAllocator::time_based(None)?),
    })
}
