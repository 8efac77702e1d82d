use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::commit::CommitSnapshot;
use crate::log::{LogKey, LogValue, TransactionLog, TreeKind};
use crate::page::{
    trie, IndirectPage, MetaPage, NodePage, Page, PageReference, RevisionRootPage, Slot, TrieRoot,
    UberPage,
};
use crate::primitives::bytes::ord;
use crate::primitives::concurrency::WriterGuard;
use crate::types::{NodeKey, PageKey, Result, Revision, StorageKey, StratumError};

use super::session::SessionInner;

/// The single open write transaction of a session.
///
/// Every modification lands in the transaction log. [`commit`] hands the
/// log to the commit strategy and the same transaction carries on as the
/// next revision; [`abort`] throws the log away and rebases on the newest
/// committed revision.
///
/// [`commit`]: WriteTransaction::commit
/// [`abort`]: WriteTransaction::abort
pub struct WriteTransaction {
    inner: Arc<SessionInner>,
    _guard: WriterGuard,
    draft: Option<Draft>,
    failed: Option<Arc<CommitSnapshot>>,
}

/// Revision under construction.
struct Draft {
    uber: UberPage,
    root: RevisionRootPage,
    meta: MetaPage,
    log: TransactionLog,
}

impl Draft {
    /// Starts the revision following `previous`, wiring its root into the revision trie.
    fn begin(source: &SessionInner, previous: &UberPage) -> Result<Self> {
        let mut uber = previous.successor();
        let revision = Revision(previous.revision_count());
        let meta_key = uber.allocate_key();
        let root_key = uber.allocate_key();
        let (root, meta) = match previous.latest_revision() {
            Some(latest) => {
                let last = source.revision_root(previous, latest)?;
                let meta = source.meta_of(&last)?.copy_as(meta_key, revision);
                (last.successor(root_key, revision, meta_key), meta)
            }
            None => (
                RevisionRootPage::new(root_key, revision, meta_key),
                MetaPage::new(meta_key, revision),
            ),
        };

        let mut log = TransactionLog::new();
        let mut tree = *uber.revision_tree();
        let parent = prepare_path(source, &mut log, &mut uber, &mut tree, TreeKind::Revision, revision.0)?;
        *uber.revision_tree_mut() = tree;
        link(&mut log, parent, trie::child_offset(revision.0, 0), root_key)?;
        debug!(revision = revision.0, "write.revision_started");
        Ok(Self {
            uber,
            root,
            meta,
            log,
        })
    }

    /// Newest version of `page_key` as seen by this draft.
    fn lookup(&self, source: &SessionInner, page_key: PageKey) -> Result<PageReference> {
        let tree = self.root.node_tree();
        if !tree.covers(page_key.0) {
            return Ok(PageReference::NULL);
        }
        let mut current = tree.root;
        for depth in (1..=tree.height).rev() {
            let offset = trie::child_offset(page_key.0, depth - 1);
            current = match self.log.get(&LogKey::indirect(TreeKind::Node, depth, page_key.0)) {
                Some(value) => value.complete.as_indirect()?.reference(offset),
                None => match current.resolve(source)? {
                    Some(page) => page.as_indirect()?.reference(offset),
                    None => return Ok(PageReference::NULL),
                },
            };
        }
        Ok(current)
    }
}

/// Copies or creates every indirect page on the path to `leaf` into the log
/// and returns the log key of the leaf's parent.
fn prepare_path(
    source: &SessionInner,
    log: &mut TransactionLog,
    keys: &mut UberPage,
    tree: &mut TrieRoot,
    kind: TreeKind,
    leaf: u64,
) -> Result<LogKey> {
    let needed = trie::height_for(leaf);
    if tree.height == 0 {
        tree.height = needed;
    }
    while tree.height < needed {
        let key = keys.allocate_key();
        let mut grown = IndirectPage::new(key);
        grown.set_reference(0, tree.root)?;
        log.put(
            LogKey::indirect(kind, tree.height + 1, 0),
            Page::Indirect(grown),
        );
        tree.height += 1;
        tree.root = PageReference::to(key);
        debug!(?kind, height = tree.height, "write.trie_grown");
    }

    let mut parent: Option<LogKey> = None;
    for depth in (1..=tree.height).rev() {
        let log_key = LogKey::indirect(kind, depth, leaf);
        if !log.contains(&log_key) {
            let offset = trie::child_offset(leaf, depth);
            let current = match parent {
                None => tree.root,
                Some(parent) => logged(log, parent)?.complete.as_indirect()?.reference(offset),
            };
            let key = keys.allocate_key();
            let page = match current.resolve(source)? {
                Some(existing) => existing.as_indirect()?.copy_as(key),
                None => IndirectPage::new(key),
            };
            log.put(log_key, Page::Indirect(page));
            match parent {
                None => tree.root = PageReference::to(key),
                Some(parent) => link(log, parent, offset, key)?,
            }
        }
        parent = Some(log_key);
    }
    parent.ok_or(StratumError::Precondition("trie path has no levels"))
}

fn logged(log: &TransactionLog, key: LogKey) -> Result<&LogValue> {
    log.get(&key)
        .ok_or(StratumError::Precondition("indirect page missing from the log"))
}

/// Points child `offset` of the logged indirect page `parent` at `child`.
fn link(log: &mut TransactionLog, parent: LogKey, offset: usize, child: StorageKey) -> Result<()> {
    let value = log
        .get_mut(&parent)
        .ok_or(StratumError::Precondition("indirect page missing from the log"))?;
    value
        .complete
        .as_indirect_mut()?
        .set_reference(offset, PageReference::to(child))?;
    value
        .modified
        .as_indirect_mut()?
        .set_reference(offset, PageReference::to(child))
}

impl WriteTransaction {
    pub(crate) fn begin(inner: Arc<SessionInner>) -> Result<Self> {
        let guard = inner.lock.acquire_writer()?;
        let base = match inner.commit.clear_failure() {
            Some(failed) => {
                warn!(
                    revision = failed.revision().0,
                    "write.discarded_failed_commit"
                );
                inner.rebase_on_published()
            }
            None => Arc::clone(&inner.head.lock()),
        };
        let draft = Draft::begin(&inner, &base)?;
        Ok(Self {
            inner,
            _guard: guard,
            draft: Some(draft),
            failed: None,
        })
    }

    fn draft(&self) -> Result<&Draft> {
        self.draft
            .as_ref()
            .ok_or(StratumError::Precondition("failed commit must be retried or aborted"))
    }

    fn draft_mut(&mut self) -> Result<&mut Draft> {
        self.draft
            .as_mut()
            .ok_or(StratumError::Precondition("failed commit must be retried or aborted"))
    }

    /// Revision the next commit publishes.
    pub fn revision(&self) -> Result<Revision> {
        match (&self.draft, &self.failed) {
            (Some(draft), _) => Ok(draft.root.revision()),
            (None, Some(failed)) => Ok(failed.revision()),
            (None, None) => Err(StratumError::Precondition("transaction has no revision")),
        }
    }

    /// True while a failed commit waits to be retried or aborted.
    pub fn has_failed_commit(&self) -> bool {
        self.failed.is_some()
    }

    /// Number of dirty trie pages in the log.
    pub fn dirty_pages(&self) -> usize {
        self.draft.as_ref().map_or(0, |draft| draft.log.len())
    }

    /// Hands out a node key no earlier revision has used.
    pub fn allocate_node_key(&mut self) -> Result<NodeKey> {
        self.draft_mut()?.root.allocate_node_key()
    }

    /// Highest node key used so far.
    pub fn max_node_key(&self) -> Result<Option<NodeKey>> {
        Ok(self.draft()?.root.max_node_key())
    }

    /// Record stored under `key`, including this transaction's own writes.
    pub fn get(&self, key: NodeKey) -> Result<Option<Bytes>> {
        let draft = self.draft()?;
        let page_key = key.page_key();
        if let Some(value) = draft.log.get(&LogKey::node(page_key)) {
            return Ok(value.complete.as_node()?.get(key.slot()).cloned());
        }
        let Some(newest) = draft.lookup(&self.inner, page_key)?.key() else {
            return Ok(None);
        };
        if let Some(value) = self.inner.commit.value_in_progress(&LogKey::node(page_key)) {
            if value.modified.key() == newest {
                return Ok(value.complete.as_node()?.get(key.slot()).cloned());
            }
        }
        let page = self.inner.logical_page(newest)?;
        Ok(page.get(key.slot()).cloned())
    }

    /// Stores `value` under `key`.
    pub fn set(&mut self, key: NodeKey, value: impl Into<Bytes>) -> Result<()> {
        let value = value.into();
        ord::check_field_len(value.len())?;
        let slot = key.slot();
        let entry = self.prepare_node_page(key.page_key())?;
        entry
            .complete
            .as_node_mut()?
            .set_slot(slot, Slot::Present(value.clone()))?;
        entry.modified.as_node_mut()?.set_slot(slot, Slot::Present(value))?;
        self.draft_mut()?.root.reserve_node_key(key);
        Ok(())
    }

    /// Removes the record under `key`; returns false if there was none.
    pub fn remove(&mut self, key: NodeKey) -> Result<bool> {
        if self.get(key)?.is_none() {
            return Ok(false);
        }
        let slot = key.slot();
        let entry = self.prepare_node_page(key.page_key())?;
        entry.complete.as_node_mut()?.set_slot(slot, Slot::Empty)?;
        let modified = entry.modified.as_node_mut()?;
        let tombstone = if modified.is_full() {
            Slot::Empty
        } else {
            Slot::Removed
        };
        modified.set_slot(slot, tombstone)?;
        Ok(true)
    }

    /// Metadata entry `name` as this revision will publish it.
    pub fn get_meta(&self, name: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.draft()?.meta.get(name).map(<[u8]>::to_vec))
    }

    /// Sets metadata entry `name`, returning the replaced value.
    pub fn put_meta(&mut self, name: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        ord::check_field_len(name.len())?;
        ord::check_field_len(value.len())?;
        Ok(self.draft_mut()?.meta.put(name, value))
    }

    /// Removes metadata entry `name`, returning its value.
    pub fn remove_meta(&mut self, name: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.draft_mut()?.meta.remove(name))
    }

    /// Logs the node page at `page_key`, preparing it through the revisioning strategy.
    fn prepare_node_page(&mut self, page_key: PageKey) -> Result<&mut LogValue> {
        let inner = &*self.inner;
        let draft = self
            .draft
            .as_mut()
            .ok_or(StratumError::Precondition("failed commit must be retried or aborted"))?;
        let log_key = LogKey::node(page_key);
        if !draft.log.contains(&log_key) {
            let revision = draft.root.revision();
            let mut tree = *draft.root.node_tree();
            let parent = prepare_path(inner, &mut draft.log, &mut draft.uber, &mut tree, TreeKind::Node, page_key.0)?;
            *draft.root.node_tree_mut() = tree;

            let offset = trie::child_offset(page_key.0, 0);
            let existing = logged(&draft.log, parent)?
                .complete
                .as_indirect()?
                .reference(offset);
            let key = draft.uber.allocate_key();
            let value = match existing.key() {
                Some(newest) => {
                    let versions = inner.load_versions(newest)?;
                    let prepared = inner.revisioning().prepare_modification(
                        &versions,
                        inner.window(),
                        key,
                        revision,
                    )?;
                    debug!(
                        page_key = page_key.0,
                        versions = versions.len(),
                        full = prepared.modified.is_full(),
                        "write.page_prepared"
                    );
                    LogValue::split(Page::Node(prepared.complete), Page::Node(prepared.modified))?
                }
                None => LogValue::new(Page::Node(NodePage::new(key, page_key, revision))),
            };
            draft.log.insert(log_key, value);
            link(&mut draft.log, parent, offset, key)?;
        }
        draft
            .log
            .get_mut(&log_key)
            .ok_or(StratumError::Precondition("node page missing from the log"))
    }

    /// Commits the current revision and starts the next one.
    ///
    /// On failure the frozen revision is kept: calling `commit` again
    /// retries it, [`abort`](Self::abort) drops it. With non-blocking
    /// commits the failure of an earlier revision can surface here; only
    /// `abort` recovers from that.
    pub fn commit(&mut self) -> Result<Revision> {
        self.inner.ensure_open()?;
        let snapshot = match self.failed.take() {
            Some(snapshot) => snapshot,
            None => {
                let draft = self
                    .draft
                    .take()
                    .ok_or(StratumError::Precondition("transaction has no revision"))?;
                Arc::new(CommitSnapshot::new(draft.log, draft.root, draft.meta, draft.uber))
            }
        };
        let revision = snapshot.revision();
        match self.inner.commit.execute(Arc::clone(&snapshot)) {
            Ok(_ticket) => {
                let uber = Arc::new(snapshot.uber().clone());
                *self.inner.head.lock() = Arc::clone(&uber);
                self.draft = Some(Draft::begin(&self.inner, &uber)?);
                Ok(revision)
            }
            Err(err) => {
                warn!(revision = revision.0, error = %err, "write.commit_failed");
                self.failed = Some(snapshot);
                Err(err)
            }
        }
    }

    /// Discards uncommitted changes and rebases on the newest committed revision.
    pub fn abort(&mut self) -> Result<()> {
        let had_failure = self.failed.take().is_some();
        let base = match self.inner.commit.clear_failure() {
            Some(_) => self.inner.rebase_on_published(),
            None => {
                if had_failure {
                    self.inner.forget_cached();
                }
                Arc::clone(&self.inner.head.lock())
            }
        };
        self.draft = None;
        self.draft = Some(Draft::begin(&self.inner, &base)?);
        debug!(rebased_on = base.revision_count(), "write.aborted");
        Ok(())
    }
}
