#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tern::cache::{PatternCache, ShardedLruBackend};
use tern::refresh::{RefreshCoordinator, RefreshOutcome};
use tern::testkit::{MemoryRefreshStore, MemoryTripleSource, ScriptedFetcher};
use tern::{Config, Result, Statement, Term, TriplePattern};

fn st(s: &str, p: &str, o: &str) -> Statement {
    Statement::new(s.into(), p.into(), o.into(), None)
}

fn cache() -> Arc<PatternCache> {
    Arc::new(PatternCache::new(
        Arc::new(ShardedLruBackend::new(
            8,
            256,
            Duration::ZERO,
            Duration::ZERO,
        )),
        1_000,
    ))
}

fn coordinator(
    store: Arc<MemoryRefreshStore>,
    fetcher: Arc<ScriptedFetcher>,
    cache: Arc<PatternCache>,
) -> RefreshCoordinator {
    RefreshCoordinator::new(&Config::default(), store, fetcher, cache)
}

#[test]
fn concurrent_refreshes_of_a_stale_resource_fetch_once() -> Result<()> {
    let store = Arc::new(MemoryRefreshStore::default());
    let fetcher = Arc::new(
        ScriptedFetcher::always_ok(vec![st("s", "p", "o")]).with_delay(Duration::from_millis(50)),
    );
    let coord = Arc::new(coordinator(store, fetcher.clone(), cache()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coord = Arc::clone(&coord);
        handles.push(std::thread::spawn(move || {
            coord.refresh("http://example.org/r", false).unwrap()
        }));
    }
    let outcomes: Vec<RefreshOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(fetcher.calls(), 1, "dogpile prevented");
    assert!(outcomes.iter().all(|o| o.record().is_fresh()));
    let refreshed = outcomes
        .iter()
        .filter(|o| matches!(o, RefreshOutcome::Refreshed(_)))
        .count();
    assert_eq!(refreshed, 1, "exactly one caller performed the fetch");
    assert_eq!(coord.lock_table_len(), 0, "lock entries reclaimed");
    Ok(())
}

#[test]
fn different_resources_refresh_independently() -> Result<()> {
    let store = Arc::new(MemoryRefreshStore::default());
    let fetcher = Arc::new(ScriptedFetcher::always_ok(vec![st("s", "p", "o")]));
    let coord = Arc::new(coordinator(store.clone(), fetcher.clone(), cache()));

    let mut handles = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let coord = Arc::clone(&coord);
        handles.push(std::thread::spawn(move || {
            coord.refresh(name, false).unwrap()
        }));
    }
    for handle in handles {
        assert!(handle.join().unwrap().fetched());
    }
    assert_eq!(fetcher.calls(), 4);
    assert_eq!(store.statements_for("a").len(), 1);
    Ok(())
}

#[test]
fn successful_refresh_replaces_statements_and_clears_the_cache() -> Result<()> {
    let store = Arc::new(MemoryRefreshStore::default());
    let fetcher = Arc::new(ScriptedFetcher::always_ok(vec![st("s", "p", "new")]));
    let cache = cache();
    let coord = coordinator(store.clone(), fetcher, Arc::clone(&cache));

    // A cached result from before the refresh must not survive it.
    let source = MemoryTripleSource::default();
    source.insert(st("s", "p", "old"));
    let q = TriplePattern::new(Some(Term::from("s")), None, None, None, false);
    cache.read_through(&q, &source)?;
    assert!(cache.lookup(&q).is_some());

    coord.refresh("r", false)?;
    assert_eq!(store.statements_for("r"), vec![st("s", "p", "new")]);
    assert!(cache.lookup(&q).is_none(), "stale entry cleared");
    Ok(())
}

#[test]
fn backoff_record_blocks_refetch_until_expiry() -> Result<()> {
    let store = Arc::new(MemoryRefreshStore::default());
    let fetcher = Arc::new(ScriptedFetcher::always_fail(Some(Duration::from_millis(
        80,
    ))));
    let coord = coordinator(store, fetcher.clone(), cache());

    assert!(matches!(
        coord.refresh("r", false)?,
        RefreshOutcome::FailedBackoff(_)
    ));
    assert!(matches!(
        coord.refresh("r", false)?,
        RefreshOutcome::AlreadyFresh(_)
    ));
    assert_eq!(fetcher.calls(), 1, "backoff suppressed the retry");

    std::thread::sleep(Duration::from_millis(120));
    coord.refresh("r", false)?;
    assert_eq!(fetcher.calls(), 2, "retry allowed after backoff expiry");
    Ok(())
}

#[test]
fn expire_all_makes_every_resource_stale_and_clears_the_cache() -> Result<()> {
    let store = Arc::new(MemoryRefreshStore::default());
    let fetcher = Arc::new(ScriptedFetcher::always_ok(Vec::new()));
    let cache = cache();
    let coord = coordinator(store, fetcher.clone(), Arc::clone(&cache));

    coord.refresh("a", false)?;
    coord.refresh("b", false)?;
    assert_eq!(fetcher.calls(), 2);

    coord.expire_all()?;
    coord.refresh("a", false)?;
    coord.refresh("b", false)?;
    assert_eq!(fetcher.calls(), 4, "both resources refetched");
    Ok(())
}
