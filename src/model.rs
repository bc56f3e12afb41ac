use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh32::xxh32;

/// An RDF term as seen by this layer: an IRI, blank node label, or literal
/// in lexical form. Parsing and serialization belong to the wire-format
/// collaborators; here only identity, equality, and a stable 32-bit hash
/// matter.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Term(Arc<str>);

impl Term {
    pub fn new(lexical: impl Into<Arc<str>>) -> Self {
        Term(lexical.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable 32-bit hash of the lexical form, shared by every cache writer
    /// and reader in a deployment.
    pub fn key_hash(&self) -> i32 {
        xxh32(self.0.as_bytes(), 0) as i32
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Term({})", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::new(value)
    }
}

/// A single asserted or inferred triple, optionally scoped to a named
/// graph. `graph == None` denotes the unscoped/default graph.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Statement {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Option<Term>,
}

impl Statement {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }
}

/// A triple pattern: each of the first four slots is either a concrete term
/// or a wildcard (`None`). Used both as a query argument and as the cache
/// key template.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
    pub graph: Option<Term>,
    pub include_inferred: bool,
}

impl TriplePattern {
    pub fn new(
        subject: Option<Term>,
        predicate: Option<Term>,
        object: Option<Term>,
        graph: Option<Term>,
        include_inferred: bool,
    ) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
            include_inferred,
        }
    }

    /// Subject, predicate, and object all concrete.
    pub fn is_fully_bound(&self) -> bool {
        self.subject.is_some() && self.predicate.is_some() && self.object.is_some()
    }

    /// Concrete subject with predicate and object wildcarded; the shape
    /// that triggers anticipatory per-predicate caching.
    pub fn is_subject_only(&self) -> bool {
        self.subject.is_some() && self.predicate.is_none() && self.object.is_none()
    }

    /// Whether `st` satisfies this pattern. A `None` graph slot is the
    /// global scope and matches statements in any graph.
    pub fn matches(&self, st: &Statement) -> bool {
        fn slot(bound: &Option<Term>, value: &Term) -> bool {
            bound.as_ref().map_or(true, |t| t == value)
        }
        slot(&self.subject, &st.subject)
            && slot(&self.predicate, &st.predicate)
            && slot(&self.object, &st.object)
            && self
                .graph
                .as_ref()
                .map_or(true, |g| st.graph.as_ref() == Some(g))
    }
}
