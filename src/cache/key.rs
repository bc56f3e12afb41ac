//! Fixed-size cache keys derived from triple patterns.

use crate::model::{Statement, Term, TriplePattern};

/// Sentinel for a wildcard slot.
pub const WILDCARD_HASH: i32 = i32::MIN;

/// Five 32-bit slots: hash of subject/predicate/object/graph (or the
/// wildcard sentinel) and the inferred flag as 0/1. The encoding is shared
/// by every cache writer and reader in a deployment. Hash collisions are
/// possible; entries carry the full pattern and hits verify structural
/// equality, so a collision costs a miss, never a wrong answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CacheKey {
    pub subject: i32,
    pub predicate: i32,
    pub object: i32,
    pub graph: i32,
    pub inferred: i32,
}

impl CacheKey {
    pub fn for_pattern(pattern: &TriplePattern) -> Self {
        Self {
            subject: slot_hash(&pattern.subject),
            predicate: slot_hash(&pattern.predicate),
            object: slot_hash(&pattern.object),
            graph: slot_hash(&pattern.graph),
            inferred: i32::from(pattern.include_inferred),
        }
    }

    /// The fully-specific key a single statement would be looked up under.
    pub fn for_statement(st: &Statement, include_inferred: bool) -> Self {
        Self {
            subject: st.subject.key_hash(),
            predicate: st.predicate.key_hash(),
            object: st.object.key_hash(),
            graph: slot_hash(&st.graph),
            inferred: i32::from(include_inferred),
        }
    }
}

fn slot_hash(slot: &Option<Term>) -> i32 {
    slot.as_ref().map_or(WILDCARD_HASH, Term::key_hash)
}
