//! In-memory stand-ins for the external collaborators, used by the test
//! suites and available to downstream integration harnesses.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::cache::{CacheBackend, CacheKey, CachedEntry};
use crate::error::{Result, TernError};
use crate::id::SequenceStore;
use crate::model::{Statement, TriplePattern};
use crate::refresh::{FetchFailure, FetchedResource, RefreshRecord, RefreshStore, ResourceFetcher};
use crate::cache::TripleSource;

/// Authoritative statement set with a query counter, for asserting when
/// the cache actually hits storage.
#[derive(Default)]
pub struct MemoryTripleSource {
    statements: RwLock<Vec<Statement>>,
    queries: AtomicU64,
}

impl MemoryTripleSource {
    pub fn insert(&self, st: Statement) {
        self.statements.write().push(st);
    }

    pub fn remove(&self, st: &Statement) {
        self.statements.write().retain(|s| s != st);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

impl TripleSource for MemoryTripleSource {
    fn find(
        &self,
        pattern: &TriplePattern,
        sink: &mut dyn FnMut(Statement) -> Result<()>,
    ) -> Result<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        for st in self.statements.read().iter() {
            if pattern.matches(st) {
                sink(st.clone())?;
            }
        }
        Ok(())
    }
}

/// Sequence counter store with injectable write-back failure.
#[derive(Default)]
pub struct MemorySequenceStore {
    values: Mutex<FxHashMap<String, i64>>,
    loads: AtomicU64,
    advances: AtomicU64,
    fail_next: AtomicBool,
}

impl MemorySequenceStore {
    /// The next `advance_to` call fails with a conflict.
    pub fn fail_next_advance(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn advance_count(&self) -> u64 {
        self.advances.load(Ordering::SeqCst)
    }
}

impl SequenceStore for MemorySequenceStore {
    fn load(&self, sequence: &str) -> Result<i64> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(*self.values.lock().get(sequence).unwrap_or(&0))
    }

    fn advance_to(&self, sequence: &str, value: i64) -> Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TernError::Conflict("serialization failure".into()));
        }
        self.advances.fetch_add(1, Ordering::SeqCst);
        let mut values = self.values.lock();
        let slot = values.entry(sequence.to_string()).or_insert(0);
        // Push-forward only.
        *slot = (*slot).max(value);
        Ok(())
    }
}

/// Refresh record and per-resource statement persistence.
#[derive(Default)]
pub struct MemoryRefreshStore {
    records: Mutex<FxHashMap<String, RefreshRecord>>,
    statements: Mutex<FxHashMap<String, Vec<Statement>>>,
}

impl MemoryRefreshStore {
    pub fn statements_for(&self, resource: &str) -> Vec<Statement> {
        self.statements
            .lock()
            .get(resource)
            .cloned()
            .unwrap_or_default()
    }
}

impl RefreshStore for MemoryRefreshStore {
    fn load(&self, resource: &str) -> Result<Option<RefreshRecord>> {
        Ok(self.records.lock().get(resource).copied())
    }

    fn store(&self, resource: &str, record: RefreshRecord) -> Result<()> {
        self.records.lock().insert(resource.to_string(), record);
        Ok(())
    }

    fn replace_statements(&self, resource: &str, statements: Vec<Statement>) -> Result<()> {
        self.statements
            .lock()
            .insert(resource.to_string(), statements);
        Ok(())
    }

    fn expire_all(&self) -> Result<()> {
        let now = SystemTime::now();
        for record in self.records.lock().values_mut() {
            record.expires_at = now;
        }
        Ok(())
    }
}

enum Script {
    Ok(Vec<Statement>),
    Fail(Option<Duration>),
}

/// Fetch collaborator with a programmed outcome, a call counter, and an
/// optional artificial delay for provoking concurrent overlap.
pub struct ScriptedFetcher {
    script: Script,
    delay: Duration,
    calls: AtomicU64,
}

impl ScriptedFetcher {
    pub fn always_ok(statements: Vec<Statement>) -> Self {
        Self {
            script: Script::Ok(statements),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    pub fn always_fail(retry_after: Option<Duration>) -> Self {
        Self {
            script: Script::Fail(retry_after),
            delay: Duration::ZERO,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResourceFetcher for ScriptedFetcher {
    fn fetch(&self, _resource: &str) -> std::result::Result<FetchedResource, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.delay > Duration::ZERO {
            std::thread::sleep(self.delay);
        }
        match &self.script {
            Script::Ok(statements) => Ok(FetchedResource {
                statements: statements.clone(),
                expires_at: None,
            }),
            Script::Fail(retry_after) => Err(FetchFailure {
                reason: "scripted failure".to_string(),
                retry_after: *retry_after,
            }),
        }
    }
}

/// Cache backend whose every operation fails; exercises the degrade-to-miss
/// and swallow-write paths.
#[derive(Default)]
pub struct FailingBackend;

impl CacheBackend for FailingBackend {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedEntry>> {
        Err(TernError::Backend("cache service unavailable".into()))
    }

    fn put(&self, _key: CacheKey, _entry: CachedEntry) -> Result<()> {
        Err(TernError::Backend("cache service unavailable".into()))
    }

    fn remove(&self, _key: &CacheKey) -> Result<()> {
        Err(TernError::Backend("cache service unavailable".into()))
    }

    fn clear(&self) -> Result<()> {
        Err(TernError::Backend("cache service unavailable".into()))
    }
}
