#![allow(missing_docs)]

use std::sync::Arc;

use stratum::backend::{BlobStore, MemoryStore};
use stratum::{
    CommitMode, NodeKey, ResourceConfig, Revision, Revisioning, Session, StratumError,
};
use tempfile::tempdir;

const STRATEGIES: [(Revisioning, usize); 4] = [
    (Revisioning::FullDump, 1),
    (Revisioning::Differential, 3),
    (Revisioning::Incremental, 3),
    (Revisioning::SlidingSnapshot, 3),
];

fn memory_session(revisioning: Revisioning, window: usize, commit: CommitMode) -> Session {
    let config = ResourceConfig::default()
        .with_revisioning(revisioning, window)
        .with_commit(commit);
    Session::create_with_store(config, Arc::new(MemoryStore::new())).expect("create session")
}

fn value(session: &Session, revision: u64, key: u64) -> Option<Vec<u8>> {
    session
        .begin_read_at(Revision(revision))
        .expect("begin read")
        .get(NodeKey(key))
        .expect("get")
        .map(|bytes| bytes.to_vec())
}

#[test]
fn older_revisions_keep_their_values() {
    for (revisioning, window) in STRATEGIES {
        for commit in [CommitMode::Blocking, CommitMode::NonBlocking] {
            let session = memory_session(revisioning, window, commit);
            let mut tx = session.begin_write().unwrap();
            tx.set(NodeKey(0), "a").unwrap();
            tx.set(NodeKey(1), "b").unwrap();
            assert_eq!(tx.commit().unwrap(), Revision(1));
            drop(tx);

            let mut tx = session.begin_write().unwrap();
            tx.set(NodeKey(0), "c").unwrap();
            assert_eq!(tx.commit().unwrap(), Revision(2));
            drop(tx);
            session.wait_for_commits().unwrap();

            let ctx = format!("{revisioning} / {commit:?}");
            assert_eq!(value(&session, 1, 0).as_deref(), Some(&b"a"[..]), "{ctx}");
            assert_eq!(value(&session, 1, 1).as_deref(), Some(&b"b"[..]), "{ctx}");
            assert_eq!(value(&session, 2, 0).as_deref(), Some(&b"c"[..]), "{ctx}");
            assert_eq!(value(&session, 2, 1).as_deref(), Some(&b"b"[..]), "{ctx}");
            assert_eq!(value(&session, 0, 0), None, "{ctx}");
        }
    }
}

#[test]
fn long_histories_stay_readable_at_every_revision() {
    for (revisioning, window) in STRATEGIES {
        let session = memory_session(revisioning, window, CommitMode::Blocking);
        let mut tx = session.begin_write().unwrap();
        for round in 1..=12u64 {
            tx.set(NodeKey(round % 4), round.to_be_bytes().to_vec()).unwrap();
            tx.commit().unwrap();
        }
        for revision in 1..=12u64 {
            for key in 0..4u64 {
                let expected = (1..=revision)
                    .rev()
                    .find(|round| round % 4 == key)
                    .map(|round| round.to_be_bytes().to_vec());
                assert_eq!(
                    value(&session, revision, key),
                    expected,
                    "{revisioning} revision {revision} key {key}"
                );
            }
        }
    }
}

#[test]
fn reader_keeps_its_revision_while_writer_commits() {
    let session = memory_session(Revisioning::Incremental, 4, CommitMode::Blocking);
    let mut tx = session.begin_write().unwrap();
    tx.set(NodeKey(9), "before").unwrap();
    tx.commit().unwrap();
    let reader = session.begin_read().unwrap();
    for round in 0..10u32 {
        tx.set(NodeKey(9), format!("after {round}")).unwrap();
        tx.commit().unwrap();
    }
    assert_eq!(reader.revision(), Revision(1));
    assert_eq!(reader.get(NodeKey(9)).unwrap().as_deref(), Some(&b"before"[..]));
    assert_eq!(session.latest_revision().unwrap(), Revision(11));
}

#[test]
fn aborted_transaction_leaves_no_trace() {
    let store = Arc::new(MemoryStore::new());
    let shared: Arc<dyn BlobStore> = store.clone();
    let session = Session::create_with_store(ResourceConfig::default(), shared).unwrap();
    let before = store.len();
    let mut tx = session.begin_write().unwrap();
    for key in 0..500u64 {
        tx.set(NodeKey(key), vec![1u8; 8]).unwrap();
    }
    tx.put_meta(b"owner", b"nobody").unwrap();
    tx.abort().unwrap();
    drop(tx);
    assert_eq!(store.len(), before);
    assert_eq!(session.latest_revision().unwrap(), Revision(0));
    assert_eq!(value(&session, 0, 3), None);
}

#[test]
fn dirty_pages_survive_a_tiny_read_cache() {
    let config = ResourceConfig {
        cache_pages: 1,
        cache_shards: 1,
        ..ResourceConfig::default()
    }
    .with_revisioning(Revisioning::Differential, 2);
    let session = Session::create_with_store(config, Arc::new(MemoryStore::new())).unwrap();
    let mut tx = session.begin_write().unwrap();
    // one record per page, far more pages than the cache holds
    for page in 0..300u64 {
        tx.set(NodeKey(page << 7), page.to_be_bytes().to_vec()).unwrap();
    }
    for page in 0..300u64 {
        assert_eq!(
            tx.get(NodeKey(page << 7)).unwrap().as_deref(),
            Some(&page.to_be_bytes()[..])
        );
    }
    tx.commit().unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.page_keys().unwrap().len(), 300);
    for page in (0..300u64).step_by(7) {
        assert_eq!(
            read.get(NodeKey(page << 7)).unwrap().as_deref(),
            Some(&page.to_be_bytes()[..])
        );
    }
    assert!(session.cache_stats().misses > 0);
}

#[test]
fn metadata_follows_revisions() {
    let session = memory_session(Revisioning::FullDump, 1, CommitMode::Blocking);
    let mut tx = session.begin_write().unwrap();
    tx.put_meta(b"schema", b"v1").unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.put_meta(b"schema", b"v2").unwrap(), Some(b"v1".to_vec()));
    tx.commit().unwrap();
    assert_eq!(tx.remove_meta(b"schema").unwrap(), Some(b"v2".to_vec()));
    tx.commit().unwrap();

    let meta = |revision| {
        session
            .begin_read_at(Revision(revision))
            .unwrap()
            .meta(b"schema")
            .map(<[u8]>::to_vec)
    };
    assert_eq!(meta(1), Some(b"v1".to_vec()));
    assert_eq!(meta(2), Some(b"v2".to_vec()));
    assert_eq!(meta(3), None);
}

#[test]
fn node_keys_are_never_handed_out_twice() {
    let session = memory_session(Revisioning::Incremental, 3, CommitMode::Blocking);
    let mut tx = session.begin_write().unwrap();
    let first = tx.allocate_node_key().unwrap();
    tx.set(first, "one").unwrap();
    tx.set(NodeKey(40), "explicit").unwrap();
    tx.commit().unwrap();
    let next = tx.allocate_node_key().unwrap();
    assert_eq!(first, NodeKey(0));
    assert_eq!(next, NodeKey(41));
    assert_eq!(
        session.begin_read().unwrap().max_node_key(),
        Some(NodeKey(40))
    );
}

#[test]
fn open_or_create_refuses_a_different_configuration() {
    let dir = tempdir().unwrap();
    let config = ResourceConfig::file(dir.path()).with_revisioning(Revisioning::SlidingSnapshot, 4);
    Session::open_or_create(config.clone())
        .unwrap()
        .close()
        .unwrap();
    assert!(Session::exists(dir.path()));
    Session::open_or_create(config.clone())
        .unwrap()
        .close()
        .unwrap();
    let other = config.with_revisioning(Revisioning::FullDump, 1);
    assert!(matches!(
        Session::open_or_create(other),
        Err(StratumError::Config(_))
    ));
    assert!(matches!(
        Session::create(ResourceConfig::file(dir.path())),
        Err(StratumError::Config(_))
    ));
}

#[test]
fn closed_session_refuses_transactions() {
    let session = memory_session(Revisioning::FullDump, 1, CommitMode::NonBlocking);
    let mut tx = session.begin_write().unwrap();
    tx.set(NodeKey(1), "x").unwrap();
    tx.commit().unwrap();
    session.close().unwrap();
    assert!(matches!(tx.commit(), Err(StratumError::Closed)));
}
