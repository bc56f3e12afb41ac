#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use tern::cache::{PatternCache, ShardedLruBackend};
use tern::testkit::{FailingBackend, MemoryTripleSource};
use tern::{Result, Statement, Term, TriplePattern};

fn st(s: &str, p: &str, o: &str, g: Option<&str>) -> Statement {
    Statement::new(s.into(), p.into(), o.into(), g.map(Term::from))
}

fn pattern(
    s: Option<&str>,
    p: Option<&str>,
    o: Option<&str>,
    g: Option<&str>,
    inferred: bool,
) -> TriplePattern {
    TriplePattern::new(
        s.map(Term::from),
        p.map(Term::from),
        o.map(Term::from),
        g.map(Term::from),
        inferred,
    )
}

fn cache(max_result_size: usize) -> PatternCache {
    PatternCache::new(
        Arc::new(ShardedLruBackend::new(
            8,
            1024,
            Duration::ZERO,
            Duration::ZERO,
        )),
        max_result_size,
    )
}

#[test]
fn miss_hit_invalidate_cycle_tracks_storage() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    let triple = st("s1", "p1", "o1", Some("g1"));
    source.insert(triple.clone());

    let query = pattern(Some("s1"), None, None, Some("g1"), false);

    let first = cache.read_through(&query, &source)?;
    assert_eq!(first.as_slice(), std::slice::from_ref(&triple));
    assert_eq!(source.query_count(), 1, "miss hits storage");

    let second = cache.read_through(&query, &source)?;
    assert_eq!(second.as_slice(), std::slice::from_ref(&triple));
    assert_eq!(source.query_count(), 1, "repeat is served from cache");

    // Delete the triple and invalidate; the cached positive result must go.
    source.remove(&triple);
    cache.invalidate(
        Some(&"s1".into()),
        Some(&"p1".into()),
        Some(&"o1".into()),
        &["g1".into()],
    );

    let third = cache.read_through(&query, &source)?;
    assert!(third.is_empty());
    assert_eq!(source.query_count(), 2, "invalidation forces a re-read");
    Ok(())
}

#[test]
fn invalidation_breadth_covers_the_enumerated_key_set() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    source.insert(st("s1", "p1", "o1", Some("g1")));
    source.insert(st("s1", "p1", "o1", None));
    source.insert(st("x", "y", "z", None));

    // Populate every combination the mutation of (s1, p1, o1) must clear,
    // plus an unrelated entry that must survive.
    let mut affected = Vec::new();
    for s in [Some("s1"), None] {
        for p in [Some("p1"), None] {
            for o in [Some("o1"), None] {
                for g in [Some("g1"), None] {
                    for inferred in [false, true] {
                        affected.push(pattern(s, p, o, g, inferred));
                    }
                }
            }
        }
    }
    for q in &affected {
        cache.read_through(q, &source)?;
        assert!(cache.lookup(q).is_some(), "populated {q:?}");
    }
    let unrelated = pattern(Some("x"), Some("y"), Some("z"), None, false);
    cache.read_through(&unrelated, &source)?;

    cache.invalidate(
        Some(&"s1".into()),
        Some(&"p1".into()),
        Some(&"o1".into()),
        &["g1".into()],
    );

    for q in &affected {
        assert!(cache.lookup(q).is_none(), "still cached: {q:?}");
    }
    assert!(cache.lookup(&unrelated).is_some(), "unrelated entry kept");
    Ok(())
}

#[test]
fn wildcard_mutation_clears_everything() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    source.insert(st("a", "b", "c", None));
    let q = pattern(Some("a"), None, None, None, false);
    cache.read_through(&q, &source)?;

    // Bulk removal with unknown object: the affected set cannot be
    // enumerated, so the whole cache goes.
    cache.invalidate(Some(&"other".into()), Some(&"p".into()), None, &[]);
    assert!(cache.lookup(&q).is_none());
    Ok(())
}

#[test]
fn fully_specific_statement_keys_are_prepopulated() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    let triple = st("s", "p", "o", Some("g"));
    source.insert(triple.clone());

    cache.read_through(&pattern(Some("s"), None, None, None, false), &source)?;
    assert_eq!(source.query_count(), 1);

    let point = pattern(Some("s"), Some("p"), Some("o"), Some("g"), false);
    let hit = cache.lookup(&point).expect("point lookup prepopulated");
    assert_eq!(hit.as_slice(), std::slice::from_ref(&triple));
    assert_eq!(source.query_count(), 1, "no storage access for the hit");
    Ok(())
}

#[test]
fn subject_only_query_prepopulates_per_predicate_groups() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    source.insert(st("s", "name", "alice", None));
    source.insert(st("s", "age", "42", None));
    source.insert(st("s", "age", "43", None));

    cache.read_through(&pattern(Some("s"), None, None, None, false), &source)?;
    assert_eq!(source.query_count(), 1);

    let ages = cache
        .lookup(&pattern(Some("s"), Some("age"), None, None, false))
        .expect("per-predicate group prepopulated");
    assert_eq!(ages.len(), 2);
    let names = cache
        .lookup(&pattern(Some("s"), Some("name"), None, None, false))
        .expect("per-predicate group prepopulated");
    assert_eq!(names.len(), 1);
    assert_eq!(source.query_count(), 1, "both served without storage");
    Ok(())
}

#[test]
fn oversize_results_stream_through_uncached() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(10);
    for i in 0..50 {
        source.insert(st("s", "p", &format!("o{i}"), None));
    }
    let q = pattern(Some("s"), Some("p"), None, None, false);

    let result = cache.read_through(&q, &source)?;
    assert_eq!(result.len(), 50, "caller still gets the full result");
    assert!(cache.lookup(&q).is_none(), "huge scan not cached");
    assert_eq!(cache.metrics().oversize_skips, 1);

    cache.read_through(&q, &source)?;
    assert_eq!(source.query_count(), 2, "every read goes to storage");
    Ok(())
}

#[test]
fn repeated_lookup_and_invalidation_are_idempotent() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = cache(100);
    source.insert(st("s", "p", "o", None));
    let q = pattern(Some("s"), None, None, None, false);

    let a = cache.read_through(&q, &source)?;
    let b = cache.read_through(&q, &source)?;
    assert_eq!(a, b);

    cache.invalidate(Some(&"s".into()), Some(&"p".into()), Some(&"o".into()), &[]);
    cache.invalidate(Some(&"s".into()), Some(&"p".into()), Some(&"o".into()), &[]);
    assert!(cache.lookup(&q).is_none());
    Ok(())
}

#[test]
fn transaction_mirrors_storage_commit() -> Result<()> {
    let shared = Arc::new(ShardedLruBackend::new(
        8,
        1024,
        Duration::ZERO,
        Duration::ZERO,
    ));
    let writer = PatternCache::new(shared.clone(), 100);
    let reader = PatternCache::new(shared, 100);
    let source = MemoryTripleSource::default();
    source.insert(st("s", "p", "o", None));
    let q = pattern(Some("s"), None, None, None, false);

    writer.begin()?;
    writer.read_through(&q, &source)?;
    assert!(
        reader.lookup(&q).is_none(),
        "uncommitted results stay private"
    );
    writer.commit()?;
    assert!(reader.lookup(&q).is_some(), "published on commit");

    // And the rollback direction: staged invalidation never published.
    writer.begin()?;
    writer.invalidate_all();
    writer.rollback()?;
    assert!(reader.lookup(&q).is_some());
    Ok(())
}

#[test]
fn unavailable_backend_degrades_to_misses() -> Result<()> {
    let source = MemoryTripleSource::default();
    let cache = PatternCache::new(Arc::new(FailingBackend), 100);
    source.insert(st("s", "p", "o", None));
    let q = pattern(Some("s"), None, None, None, false);

    let first = cache.read_through(&q, &source)?;
    assert_eq!(first.len(), 1);
    let second = cache.read_through(&q, &source)?;
    assert_eq!(second.len(), 1);
    assert_eq!(source.query_count(), 2, "every read falls through");

    // Mutations must not fail either, the write errors are swallowed.
    cache.invalidate(Some(&"s".into()), Some(&"p".into()), Some(&"o".into()), &[]);
    cache.invalidate_all();
    assert!(cache.metrics().backend_errors > 0);
    Ok(())
}
