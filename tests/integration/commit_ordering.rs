#![allow(missing_docs)]

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stratum::backend::{BlobStore, MemoryStore};
use stratum::page::Page;
use stratum::{
    CommitMode, NodeKey, ResourceConfig, Result, Revision, Revisioning, Session, StorageKey,
    StratumError,
};

#[derive(Clone, Debug)]
enum Event {
    Page(StorageKey, Vec<u8>),
    Root(Vec<u8>),
}

/// Memory store that records every write and can be told to fail.
#[derive(Default)]
struct RecordingStore {
    inner: MemoryStore,
    events: Mutex<Vec<Event>>,
    failing: AtomicBool,
}

impl RecordingStore {
    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StratumError::Io(io::Error::other("injected write failure")));
        }
        Ok(())
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn published_revision_counts(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Root(bytes) => {
                    let page = Page::decode(&bytes).unwrap();
                    Some(page.as_uber().unwrap().revision_count())
                }
                Event::Page(..) => None,
            })
            .collect()
    }
}

impl BlobStore for RecordingStore {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()> {
        self.check()?;
        self.events.lock().push(Event::Page(key, bytes.to_vec()));
        self.inner.put(key, bytes)
    }

    fn get_root(&self) -> Result<Option<Vec<u8>>> {
        self.inner.get_root()
    }

    fn put_root(&self, bytes: &[u8]) -> Result<()> {
        self.check()?;
        self.events.lock().push(Event::Root(bytes.to_vec()));
        self.inner.put_root(bytes)
    }

    fn sync(&self) -> Result<()> {
        self.check()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}

fn session_over(store: &Arc<RecordingStore>, commit: CommitMode) -> Session {
    let config = ResourceConfig::default()
        .with_revisioning(Revisioning::Incremental, 3)
        .with_commit(commit);
    let shared: Arc<dyn BlobStore> = store.clone();
    Session::create_with_store(config, shared).unwrap()
}

/// Keys a page points at.
fn children(page: &Page) -> Vec<StorageKey> {
    match page {
        Page::Indirect(indirect) => indirect.children().map(|(_, key)| key).collect(),
        Page::RevisionRoot(root) => [root.node_tree().root.key(), root.meta().key()]
            .into_iter()
            .flatten()
            .collect(),
        _ => Vec::new(),
    }
}

#[test]
fn children_are_written_before_parents_and_uber_last() {
    let store = Arc::new(RecordingStore::default());
    let session = session_over(&store, CommitMode::Blocking);
    let mut tx = session.begin_write().unwrap();
    // spread records over two trie levels
    for page in [0u64, 1, 129, 300] {
        tx.set(NodeKey(page << 7), "x").unwrap();
    }
    tx.commit().unwrap();
    tx.set(NodeKey(5), "y").unwrap();
    tx.commit().unwrap();

    let events = store.events();
    let mut written: HashSet<StorageKey> = HashSet::new();
    let mut commit_pages: HashSet<StorageKey> = HashSet::new();
    let mut commits = 0;
    for event in &events {
        match event {
            Event::Page(key, bytes) => {
                let page = Page::decode(bytes).unwrap();
                assert_eq!(page.key(), *key);
                for child in children(&page) {
                    assert!(
                        written.contains(&child),
                        "{} {key} written before its child {child}",
                        page.kind()
                    );
                }
                written.insert(*key);
                commit_pages.insert(*key);
            }
            Event::Root(bytes) => {
                let Page::Uber(uber) = Page::decode(bytes).unwrap() else {
                    panic!("root is not an uber page");
                };
                let top = uber.revision_tree().root.key().unwrap();
                assert!(commit_pages.contains(&top), "uber published before its revision trie");
                commit_pages.clear();
                commits += 1;
            }
        }
    }
    assert_eq!(commits, 3);
    assert!(matches!(events.last(), Some(Event::Root(_))));
}

#[test]
fn nonblocking_publication_is_monotonic() {
    let store = Arc::new(RecordingStore::default());
    let session = session_over(&store, CommitMode::NonBlocking);
    let mut tx = session.begin_write().unwrap();
    for round in 0..40u64 {
        tx.set(NodeKey(round % 300), round.to_be_bytes().to_vec()).unwrap();
        tx.commit().unwrap();
    }
    drop(tx);
    session.wait_for_commits().unwrap();
    assert_eq!(store.published_revision_counts(), (1..=41).collect::<Vec<_>>());
    assert_eq!(session.latest_revision().unwrap(), Revision(40));
}

#[test]
fn nonblocking_failure_publishes_nothing_later() {
    let store = Arc::new(RecordingStore::default());
    let session = session_over(&store, CommitMode::NonBlocking);
    let mut tx = session.begin_write().unwrap();
    for round in 0..3u8 {
        tx.set(NodeKey(u64::from(round)), vec![round]).unwrap();
        tx.commit().unwrap();
    }
    session.wait_for_commits().unwrap();
    let published = store.published_revision_counts();

    store.failing.store(true, Ordering::SeqCst);
    tx.set(NodeKey(10), "lost").unwrap();
    let _ = tx.commit();
    assert!(matches!(
        session.wait_for_commits(),
        Err(StratumError::CommitFailure(_))
    ));
    tx.set(NodeKey(11), "refused").unwrap();
    assert!(matches!(tx.commit(), Err(StratumError::CommitFailure(_))));
    assert!(tx.has_failed_commit());
    assert!(matches!(
        tx.set(NodeKey(12), "x"),
        Err(StratumError::Precondition(_))
    ));
    assert_eq!(store.published_revision_counts(), published);
    assert_eq!(session.latest_revision().unwrap(), Revision(3));

    store.failing.store(false, Ordering::SeqCst);
    tx.abort().unwrap();
    assert_eq!(tx.get(NodeKey(10)).unwrap(), None);
    tx.set(NodeKey(20), "after").unwrap();
    assert_eq!(tx.commit().unwrap(), Revision(4));
    drop(tx);
    session.wait_for_commits().unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(20)).unwrap().as_deref(), Some(&b"after"[..]));
    assert_eq!(read.get(NodeKey(2)).unwrap().as_deref(), Some(&[2u8][..]));
    assert_eq!(read.get(NodeKey(10)).unwrap(), None);
}

#[test]
fn blocking_failure_keeps_the_revision_for_retry() {
    let store = Arc::new(RecordingStore::default());
    let session = session_over(&store, CommitMode::Blocking);
    let mut tx = session.begin_write().unwrap();
    tx.set(NodeKey(1), "kept").unwrap();
    store.failing.store(true, Ordering::SeqCst);
    assert!(matches!(tx.commit(), Err(StratumError::CommitFailure(_))));
    assert_eq!(tx.revision().unwrap(), Revision(1));
    assert_eq!(session.latest_revision().unwrap(), Revision(0));

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(tx.commit().unwrap(), Revision(1));
    assert!(!tx.has_failed_commit());
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(1)).unwrap().as_deref(), Some(&b"kept"[..]));
}
