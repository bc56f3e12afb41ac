use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TernError>;

/// Errors surfaced by the identity and caching core.
///
/// Only `Invalid` is startup-fatal (allocator misconfiguration). `Conflict`
/// is propagated so the caller can retry the surrounding transaction;
/// `Backend` failures are absorbed at the cache and refresh boundaries and
/// normally never reach a caller.
#[derive(Debug, Error)]
pub enum TernError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("write conflict: {0}")]
    Conflict(String),
    #[error("backend error: {0}")]
    Backend(String),
}
