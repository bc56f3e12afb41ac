#![allow(missing_docs)]

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use tern::id::{allocator_from_config, FlakeAllocator, IdAllocator, SequenceAllocator};
use tern::testkit::MemorySequenceStore;
use tern::{Config, IdStrategy, Result};

fn config(strategy: IdStrategy) -> Config {
    Config {
        id_strategy: strategy,
        ..Config::default()
    }
}

fn build(strategy: IdStrategy) -> Result<Arc<dyn IdAllocator>> {
    allocator_from_config(&config(strategy), Arc::new(MemorySequenceStore::default()))
}

#[test]
fn factory_builds_every_strategy() -> Result<()> {
    for strategy in [
        IdStrategy::DistributedTimeSequence,
        IdStrategy::MemorySequence,
        IdStrategy::UuidRandom,
        IdStrategy::UuidTime,
    ] {
        let alloc = build(strategy)?;
        alloc.initialize()?;
        let a = alloc.allocate("node")?;
        let b = alloc.allocate("node")?;
        assert_ne!(a, b, "{strategy:?}");
        alloc.commit()?;
        alloc.shutdown()?;
    }
    Ok(())
}

#[test]
fn unsupported_strategy_name_is_fatal_at_startup() {
    let err = Config::from_options([("id.strategy", "oracle-sequence")]).unwrap_err();
    assert!(err.to_string().contains("oracle-sequence"));
}

#[test]
fn concurrent_allocation_is_pairwise_distinct() -> Result<()> {
    for strategy in [
        IdStrategy::DistributedTimeSequence,
        IdStrategy::MemorySequence,
        IdStrategy::UuidRandom,
    ] {
        let alloc = build(strategy)?;
        alloc.initialize()?;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(std::thread::spawn(move || {
                (0..2_000)
                    .map(|_| alloc.allocate("node").unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "{strategy:?} issued {id} twice");
            }
        }
        alloc.shutdown()?;
    }
    Ok(())
}

#[test]
fn flake_ids_are_monotonic_in_real_time() -> Result<()> {
    let alloc = FlakeAllocator::new(5)?;
    let earlier: Vec<i64> = (0..5_000).map(|_| alloc.next_id().unwrap()).collect();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let later = alloc.next_id()?;
    for id in earlier {
        assert!(id < later);
    }
    Ok(())
}

#[test]
fn sequence_ids_survive_commit_and_reprime() -> Result<()> {
    let store = Arc::new(MemorySequenceStore::default());
    let first = SequenceAllocator::new(store.clone());
    let mut issued = Vec::new();
    for _ in 0..100 {
        issued.push(first.allocate("node")?);
    }
    first.commit()?;
    drop(first);

    // A new allocator primed from the same store continues past every id
    // the first one issued.
    let second = SequenceAllocator::new(store);
    let next = second.allocate("node")?;
    assert!(issued.iter().all(|id| *id < next));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn allocation_batches_never_collide(
        count in 1usize..400,
        sequences in prop::collection::vec("[a-z]{1,8}", 1..4),
    ) {
        let alloc = SequenceAllocator::new(Arc::new(MemorySequenceStore::default()));
        let mut seen = HashSet::new();
        for i in 0..count {
            let sequence = &sequences[i % sequences.len()];
            let id = alloc.allocate(sequence).unwrap();
            prop_assert!(seen.insert((sequence.clone(), id)));
        }
    }
}
