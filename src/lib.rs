//! Tern: the identity-and-caching core of an RDF triple store.
//!
//! Three components, leaf-first:
//!
//! - [`id`]: mints globally unique 64-bit identifiers for new nodes and
//!   statements under one of several interchangeable strategies.
//! - [`cache`]: a transactionally-consistent cache of triple-pattern query
//!   results in front of the authoritative storage backend.
//! - [`refresh`]: a coordinator that keeps at most one fetch in flight per
//!   externally-cached resource.
//!
//! The storage engine, query engine, and remote retrieval are external
//! collaborators behind the [`cache::TripleSource`], [`id::SequenceStore`],
//! [`refresh::RefreshStore`], and [`refresh::ResourceFetcher`] traits.

#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod id;
pub mod model;
pub mod refresh;
pub mod testkit;

pub use cache::{cache_from_config, PatternCache, TripleSource};
pub use config::{Config, IdStrategy};
pub use error::{Result, TernError};
pub use id::{allocator_from_config, IdAllocator};
pub use model::{Statement, Term, TriplePattern};
pub use refresh::{RefreshCoordinator, RefreshOutcome, RefreshRecord};
