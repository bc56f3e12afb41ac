//! Per-resource refresh coordination for externally-cached resources.
//!
//! Guards the "fetch remote resource and repopulate" operation so that at
//! most one fetch is in flight per resource, whatever the concurrent
//! demand (the dogpile effect). Refreshes of different resources proceed
//! fully in parallel; only same-resource refreshes serialize.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::cache::PatternCache;
use crate::config::Config;
use crate::error::Result;
use crate::model::Statement;

/// Per-resource fetch metadata, persisted in the authoritative store.
/// Updated on every fetch attempt, including failed ones; never deleted
/// except by full cache invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshRecord {
    pub last_fetched: SystemTime,
    pub expires_at: SystemTime,
}

impl RefreshRecord {
    pub fn is_fresh_at(&self, now: SystemTime) -> bool {
        now < self.expires_at
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(SystemTime::now())
    }
}

/// A successfully fetched resource: its statements and the expiry the
/// response carried, if any.
#[derive(Clone, Debug)]
pub struct FetchedResource {
    pub statements: Vec<Statement>,
    pub expires_at: Option<SystemTime>,
}

/// A failed fetch attempt. `retry_after` is the server-provided backoff,
/// if the response carried one.
#[derive(Clone, Debug)]
pub struct FetchFailure {
    pub reason: String,
    pub retry_after: Option<Duration>,
}

/// The external retrieval collaborator. Expected to bound its own fetch
/// time; a fetch that never returns holds its resource's lock forever.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, resource: &str) -> std::result::Result<FetchedResource, FetchFailure>;
}

/// Authoritative persistence behind the coordinator: refresh records and
/// the cached statements of each tracked resource.
pub trait RefreshStore: Send + Sync {
    fn load(&self, resource: &str) -> Result<Option<RefreshRecord>>;
    fn store(&self, resource: &str, record: RefreshRecord) -> Result<()>;
    /// Atomically replaces the resource's cached statements.
    fn replace_statements(&self, resource: &str, statements: Vec<Statement>) -> Result<()>;
    /// Floors every record's expiry to now.
    fn expire_all(&self) -> Result<()>;
}

/// What a `refresh` call observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The record was already fresh; no fetch happened.
    AlreadyFresh(RefreshRecord),
    /// This call performed the fetch and the resource is fresh again.
    Refreshed(RefreshRecord),
    /// This call performed the fetch, it failed, and a backoff record was
    /// written. The underlying error is not surfaced.
    FailedBackoff(RefreshRecord),
}

impl RefreshOutcome {
    pub fn record(&self) -> RefreshRecord {
        match *self {
            RefreshOutcome::AlreadyFresh(r)
            | RefreshOutcome::Refreshed(r)
            | RefreshOutcome::FailedBackoff(r) => r,
        }
    }

    pub fn fetched(&self) -> bool {
        !matches!(self, RefreshOutcome::AlreadyFresh(_))
    }
}

struct ResourceLock {
    mutex: Arc<Mutex<()>>,
    waiters: AtomicUsize,
}

/// Coordinates refreshes of externally-cached resources.
pub struct RefreshCoordinator {
    store: Arc<dyn RefreshStore>,
    fetcher: Arc<dyn ResourceFetcher>,
    cache: Arc<PatternCache>,
    default_expiry: Duration,
    retry_after: Duration,
    /// Ephemeral per-resource locks; an entry lives only while some thread
    /// holds or waits on it. The table mutex guards insert/remove only and
    /// is never held across a fetch.
    locks: Mutex<FxHashMap<String, Arc<ResourceLock>>>,
}

impl RefreshCoordinator {
    pub fn new(
        config: &Config,
        store: Arc<dyn RefreshStore>,
        fetcher: Arc<dyn ResourceFetcher>,
        cache: Arc<PatternCache>,
    ) -> Self {
        Self {
            store,
            fetcher,
            cache,
            default_expiry: config.refresh_default_expiry,
            retry_after: config.refresh_retry_after,
            locks: Mutex::new(FxHashMap::default()),
        }
    }

    /// Ensures `resource` is fresh, fetching it if its record is missing,
    /// expired, or `force` is set. Concurrent calls for the same resource
    /// serialize on a per-resource lock and re-check freshness after
    /// acquiring it, so a fetch that just completed is not repeated.
    ///
    /// A fetch failure is absorbed into a backoff record; the caller only
    /// sees the resulting (possibly still stale) state.
    pub fn refresh(&self, resource: &str, force: bool) -> Result<RefreshOutcome> {
        if !force {
            if let Some(record) = self.store.load(resource)? {
                if record.is_fresh() {
                    return Ok(RefreshOutcome::AlreadyFresh(record));
                }
            }
        }

        let lease = self.acquire(resource);

        // Double-checked: a concurrent refresh may have completed while we
        // waited on the lock.
        if !force {
            if let Some(record) = self.store.load(resource)? {
                if record.is_fresh() {
                    return Ok(RefreshOutcome::AlreadyFresh(record));
                }
            }
        }

        // The fetch may be slow; no cache transaction is open around it and
        // only the per-resource lock is held.
        let outcome = match self.fetcher.fetch(resource) {
            Ok(fetched) => {
                let now = SystemTime::now();
                let record = RefreshRecord {
                    last_fetched: now,
                    expires_at: fetched.expires_at.unwrap_or(now + self.default_expiry),
                };
                self.store.replace_statements(resource, fetched.statements)?;
                self.store.store(resource, record)?;
                // Bulk replacement with an unknown affected pattern set:
                // clear rather than enumerate.
                self.cache.invalidate_all();
                debug!(resource, "refresh.completed");
                RefreshOutcome::Refreshed(record)
            }
            Err(failure) => {
                let now = SystemTime::now();
                let retry = failure.retry_after.unwrap_or(self.retry_after);
                let record = RefreshRecord {
                    last_fetched: now,
                    expires_at: now + retry,
                };
                warn!(
                    resource,
                    reason = %failure.reason,
                    retry_secs = retry.as_secs(),
                    "refresh.fetch_failed"
                );
                self.store.store(resource, record)?;
                RefreshOutcome::FailedBackoff(record)
            }
        };

        drop(lease);
        Ok(outcome)
    }

    /// Floors the resource's expiry to now, forcing the next access to
    /// refresh. No-op for a never-seen resource (its initial state is
    /// already stale).
    pub fn expire(&self, resource: &str) -> Result<()> {
        if let Some(record) = self.store.load(resource)? {
            self.store.store(
                resource,
                RefreshRecord {
                    last_fetched: record.last_fetched,
                    expires_at: SystemTime::now(),
                },
            )?;
        }
        Ok(())
    }

    /// Expires every tracked resource and clears the pattern cache.
    pub fn expire_all(&self) -> Result<()> {
        self.store.expire_all()?;
        self.cache.invalidate_all();
        Ok(())
    }

    /// Number of live per-resource lock entries; observability and tests.
    pub fn lock_table_len(&self) -> usize {
        self.locks.lock().len()
    }

    fn acquire(&self, resource: &str) -> LockLease<'_> {
        let lock = {
            let mut table = self.locks.lock();
            let entry = table
                .entry(resource.to_string())
                .or_insert_with(|| {
                    Arc::new(ResourceLock {
                        mutex: Arc::new(Mutex::new(())),
                        waiters: AtomicUsize::new(0),
                    })
                })
                .clone();
            entry.waiters.fetch_add(1, Ordering::AcqRel);
            entry
        };
        // Blocks here, after the table mutex is released.
        let guard = lock.mutex.lock_arc();
        LockLease {
            coordinator: self,
            resource: resource.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    fn release(&self, resource: &str, lock: &Arc<ResourceLock>) {
        let mut table = self.locks.lock();
        if lock.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last interested thread; drop the entry to bound memory.
            // Re-check under the table mutex: a new waiter registers before
            // it blocks on the resource mutex.
            if let Some(entry) = table.get(resource) {
                if Arc::ptr_eq(entry, lock) && entry.waiters.load(Ordering::Acquire) == 0 {
                    table.remove(resource);
                }
            }
        }
    }
}

/// Held per-resource lock. Releasing on drop keeps the lock table correct
/// even if the fetch path unwinds.
struct LockLease<'a> {
    coordinator: &'a RefreshCoordinator,
    resource: String,
    lock: Arc<ResourceLock>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.coordinator.release(&self.resource, &self.lock);
    }
}
