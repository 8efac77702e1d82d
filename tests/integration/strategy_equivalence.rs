#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use stratum::backend::MemoryStore;
use stratum::{NodeKey, ResourceConfig, Revision, Revisioning, Session};

/// One revision's mutations: node key and new value, `None` removes.
type Batch = Vec<(u64, Option<u8>)>;

fn batches() -> impl Strategy<Value = Vec<Batch>> {
    let op = (0u64..400, proptest::option::weighted(0.8, any::<u8>()));
    prop::collection::vec(prop::collection::vec(op, 1..12), 1..10)
}

fn run(revisioning: Revisioning, window: usize, history: &[Batch]) -> Vec<BTreeMap<u64, u8>> {
    let config = ResourceConfig::default().with_revisioning(revisioning, window);
    let session = Session::create_with_store(config, Arc::new(MemoryStore::new())).unwrap();
    let mut tx = session.begin_write().unwrap();
    for batch in history {
        for (key, value) in batch {
            match value {
                Some(value) => tx.set(NodeKey(*key), vec![*value]).unwrap(),
                None => {
                    tx.remove(NodeKey(*key)).unwrap();
                }
            }
        }
        tx.commit().unwrap();
    }
    drop(tx);

    (1..=history.len() as u64)
        .map(|revision| {
            let read = session.begin_read_at(Revision(revision)).unwrap();
            (0u64..400)
                .filter_map(|key| {
                    read.get(NodeKey(key))
                        .unwrap()
                        .map(|bytes| (key, bytes[0]))
                })
                .collect()
        })
        .collect()
}

fn oracle(history: &[Batch]) -> Vec<BTreeMap<u64, u8>> {
    let mut state = BTreeMap::new();
    history
        .iter()
        .map(|batch| {
            for (key, value) in batch {
                match value {
                    Some(value) => state.insert(*key, *value),
                    None => state.remove(key),
                };
            }
            state.clone()
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn every_strategy_matches_full_materialization(history in batches(), window in 2usize..5) {
        let expected = oracle(&history);
        for revisioning in [
            Revisioning::FullDump,
            Revisioning::Differential,
            Revisioning::Incremental,
            Revisioning::SlidingSnapshot,
        ] {
            let observed = run(revisioning, window, &history);
            prop_assert_eq!(&observed, &expected, "{} window {}", revisioning, window);
        }
    }
}

#[test]
fn incremental_five_deltas_match_direct_application() {
    let history: Vec<Batch> = (0..5u64).map(|i| vec![(i * 3, Some(i as u8 + 1))]).collect();
    let observed = run(Revisioning::Incremental, 6, &history);
    let last = observed.last().unwrap();
    let expected: BTreeMap<u64, u8> = (0..5u64).map(|i| (i * 3, i as u8 + 1)).collect();
    assert_eq!(last, &expected);
}
