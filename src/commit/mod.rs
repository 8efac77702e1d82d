#![forbid(unsafe_code)]
//! Turning a write transaction's log into a published revision.
//!
//! A commit freezes the log into a [`CommitSnapshot`], writes every dirty
//! page children-first, then the metadata and revision root, then the
//! revision trie, and only then publishes the new uber page. Publication
//! goes through a [`PublishGate`] so revisions become visible strictly in
//! order, whichever [`CommitStrategy`] runs the flush.

mod blocking;
mod nonblocking;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use blocking::BlockingCommit;
pub use nonblocking::NonBlockingCommit;

use crate::backend::Backend;
use crate::log::{LogKey, LogValue, TransactionLog, TreeKind};
use crate::page::{MetaPage, Page, RevisionRootPage, TrieRoot, UberPage};
use crate::primitives::concurrency::PublishGate;
use crate::types::{Result, Revision, StorageKey, StratumError};

/// How commits are executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// The committing thread flushes and publishes before returning.
    #[default]
    Blocking,
    /// A background worker flushes; the writer continues immediately.
    NonBlocking,
}

/// Immutable image of one committed revision's dirty pages.
#[derive(Debug)]
pub struct CommitSnapshot {
    entries: BTreeMap<LogKey, LogValue>,
    by_storage_key: HashMap<StorageKey, LogKey>,
    root: RevisionRootPage,
    meta: MetaPage,
    uber: UberPage,
}

impl CommitSnapshot {
    /// Freezes `log` together with the revision's root, metadata and uber page.
    pub fn new(log: TransactionLog, root: RevisionRootPage, meta: MetaPage, uber: UberPage) -> Self {
        let entries = log.into_ordered();
        let by_storage_key = entries
            .iter()
            .map(|(key, value)| (value.modified.key(), *key))
            .collect();
        Self {
            entries,
            by_storage_key,
            root,
            meta,
            uber,
        }
    }

    /// Revision this snapshot publishes.
    pub fn revision(&self) -> Revision {
        self.root.revision()
    }

    /// Uber page published last.
    pub fn uber(&self) -> &UberPage {
        &self.uber
    }

    /// Revision root of this revision.
    pub fn root(&self) -> &RevisionRootPage {
        &self.root
    }

    /// Metadata page of this revision.
    pub fn meta(&self) -> &MetaPage {
        &self.meta
    }

    /// Logged value under `key`.
    pub fn value(&self, key: &LogKey) -> Option<&LogValue> {
        self.entries.get(key)
    }

    /// Page that will be persisted under `key`, if this snapshot writes it.
    pub fn page(&self, key: StorageKey) -> Option<Page> {
        if key == self.root.key() {
            return Some(Page::RevisionRoot(self.root.clone()));
        }
        if key == self.meta.key() {
            return Some(Page::Meta(self.meta.clone()));
        }
        let log_key = self.by_storage_key.get(&key)?;
        self.entries.get(log_key).map(|value| value.modified.clone())
    }

    /// Logged entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&LogKey, &LogValue)> {
        self.entries.iter()
    }

    /// Number of logged pages, not counting root, metadata and uber.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no trie page was modified.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything a flush needs besides the snapshot.
#[derive(Clone)]
pub struct CommitContext {
    /// Backend receiving the pages.
    pub backend: Arc<Backend>,
    /// Orders publication by revision.
    pub gate: Arc<PublishGate>,
    /// Newest published uber page, shared with readers.
    pub published: Arc<RwLock<Arc<UberPage>>>,
    /// Upper bound for waiting on the publication turn.
    pub publish_timeout: Duration,
}

/// Writes `snapshot` bottom-up and publishes its uber page.
pub fn flush(ctx: &CommitContext, snapshot: &CommitSnapshot) -> Result<()> {
    let backend = &ctx.backend;
    let revision = snapshot.revision();
    debug!(revision = revision.0, pages = snapshot.len(), "commit.flush.start");

    let mut written = 0usize;
    write_trie(backend, snapshot, TreeKind::Node, snapshot.root.node_tree(), &mut written)?;
    backend.write(&Page::Meta(snapshot.meta.clone()))?;
    backend.write(&Page::RevisionRoot(snapshot.root.clone()))?;
    write_trie(
        backend,
        snapshot,
        TreeKind::Revision,
        snapshot.uber.revision_tree(),
        &mut written,
    )?;
    if written != snapshot.len() {
        return Err(StratumError::Precondition(
            "log holds pages unreachable from the committed roots",
        ));
    }
    backend.sync()?;

    ctx.gate.publish(revision, ctx.publish_timeout, || {
        backend.write_uber(&snapshot.uber)?;
        *ctx.published.write() = Arc::new(snapshot.uber.clone());
        Ok(())
    })?;
    info!(revision = revision.0, pages = written + 2, "commit.published");
    Ok(())
}

fn write_trie(
    backend: &Backend,
    snapshot: &CommitSnapshot,
    tree: TreeKind,
    trie: &TrieRoot,
    written: &mut usize,
) -> Result<()> {
    if trie.height == 0 {
        return Ok(());
    }
    let top = LogKey {
        tree,
        depth: trie.height,
        index: 0,
    };
    write_subtree(backend, snapshot, top, written)
}

fn write_subtree(
    backend: &Backend,
    snapshot: &CommitSnapshot,
    key: LogKey,
    written: &mut usize,
) -> Result<()> {
    let Some(value) = snapshot.value(&key) else {
        return Ok(());
    };
    if key.depth > 0 {
        for (offset, _) in value.modified.as_indirect()?.children() {
            write_subtree(backend, snapshot, key.child(offset), written)?;
        }
    }
    backend.write(&value.modified)?;
    *written += 1;
    Ok(())
}

/// Handle on a dispatched commit.
#[derive(Debug)]
pub struct CommitTicket {
    request: Arc<CommitRequest>,
}

impl CommitTicket {
    /// Revision being committed.
    pub fn revision(&self) -> Revision {
        self.request.snapshot.revision()
    }

    /// True once the commit succeeded or failed.
    pub fn is_done(&self) -> bool {
        self.request.result.lock().is_some()
    }

    /// Blocks until the commit completes.
    pub fn wait(&self) -> Result<()> {
        self.request.wait()
    }
}

#[derive(Debug)]
struct CommitRequest {
    snapshot: Arc<CommitSnapshot>,
    result: Mutex<Option<Result<()>>>,
    cv: Condvar,
}

impl CommitRequest {
    fn new(snapshot: Arc<CommitSnapshot>) -> Self {
        Self {
            snapshot,
            result: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    fn finish(&self, outcome: Result<()>) {
        let mut result = self.result.lock();
        if result.is_none() {
            *result = Some(outcome);
            self.cv.notify_all();
        }
    }

    fn wait(&self) -> Result<()> {
        let mut guard = self.result.lock();
        loop {
            if let Some(result) = guard.as_ref() {
                return result.as_ref().map(|_| ()).map_err(StratumError::duplicate);
            }
            self.cv.wait(&mut guard);
        }
    }
}

/// Executes commits and exposes what is still on its way to the backend.
pub trait CommitStrategy: Send + Sync {
    /// Which mode this strategy implements.
    fn mode(&self) -> CommitMode;

    /// Starts committing `snapshot`. Blocking strategies return once the
    /// revision is published; failures come back as commit failures.
    fn execute(&self, snapshot: Arc<CommitSnapshot>) -> Result<CommitTicket>;

    /// Newest in-flight value logged under `key`.
    fn value_in_progress(&self, key: &LogKey) -> Option<LogValue>;

    /// In-flight page filed under `key`.
    fn page_in_progress(&self, key: StorageKey) -> Option<Page>;

    /// True while any commit is dispatched but not finished.
    fn is_in_progress(&self) -> bool;

    /// Waits until nothing is in flight, then reports a stored failure.
    fn wait_idle(&self, timeout: Duration) -> Result<()>;

    /// Clears a stored failure, returning the snapshot that failed.
    fn clear_failure(&self) -> Option<Arc<CommitSnapshot>>;

    /// Refuses further commits and drains the in-flight ones.
    fn close(&self, timeout: Duration) -> Result<()>;
}

/// Builds the strategy for `mode`.
pub fn strategy_for(mode: CommitMode, ctx: CommitContext) -> Box<dyn CommitStrategy> {
    match mode {
        CommitMode::Blocking => Box::new(BlockingCommit::new(ctx)),
        CommitMode::NonBlocking => Box::new(NonBlockingCommit::new(ctx)),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::backend::{BlobStore, MemoryStore};

    #[test]
    fn flush_writes_everything_then_publishes() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(Arc::clone(&store));
        let snapshot = snapshot_after(&UberPage::empty());
        flush(&ctx, &snapshot).unwrap();
        // node page, two indirect pages, meta and revision root
        assert_eq!(store.len(), 5);
        assert_eq!(ctx.published.read().revision_count(), 1);
        assert_eq!(
            ctx.backend.read_uber().unwrap().as_ref(),
            Some(snapshot.uber())
        );
        assert!(store.get_root().unwrap().is_some());
    }

    #[test]
    fn unreachable_log_entries_abort_before_publication() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(Arc::clone(&store));
        let good = snapshot_after(&UberPage::empty());
        let mut log = TransactionLog::new();
        for (key, value) in good.iter() {
            log.insert(*key, value.clone());
        }
        log.put(
            LogKey::node(crate::types::PageKey(77)),
            Page::Node(crate::page::NodePage::new(
                StorageKey(999),
                crate::types::PageKey(77),
                Revision(0),
            )),
        );
        let bad = CommitSnapshot::new(
            log,
            good.root().clone(),
            good.meta().clone(),
            good.uber().clone(),
        );
        assert!(matches!(
            flush(&ctx, &bad),
            Err(StratumError::Precondition(_))
        ));
        assert!(store.get_root().unwrap().is_none());
        assert_eq!(ctx.gate.next_revision(), Revision(0));
    }

    #[test]
    fn snapshot_serves_pages_by_storage_key() {
        let snapshot = snapshot_after(&UberPage::empty());
        let root_key = snapshot.root().key();
        assert!(matches!(
            snapshot.page(root_key),
            Some(Page::RevisionRoot(_))
        ));
        let node_key = snapshot
            .value(&LogKey::node(crate::types::PageKey(0)))
            .unwrap()
            .modified
            .key();
        assert!(matches!(snapshot.page(node_key), Some(Page::Node(_))));
        assert!(snapshot.page(StorageKey(10_000)).is_none());
    }
}
