use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::page::{MetaPage, NodePage, RevisionRootPage};
use crate::primitives::concurrency::ReaderGuard;
use crate::types::{NodeKey, PageKey, Result, Revision, StratumError};

use super::session::SessionInner;

/// Read-only view of one published revision.
///
/// Readers never block the writer and keep seeing their revision no matter
/// how many commits follow.
pub struct ReadTransaction {
    inner: Arc<SessionInner>,
    root: RevisionRootPage,
    meta: MetaPage,
    _guard: ReaderGuard,
}

impl ReadTransaction {
    pub(crate) fn begin(inner: Arc<SessionInner>, revision: Revision) -> Result<Self> {
        let uber = Arc::clone(&inner.published.read());
        if revision.0 >= uber.revision_count() {
            return Err(StratumError::Invalid("revision is not published"));
        }
        let guard = inner.lock.acquire_reader();
        let root = inner.revision_root(&uber, revision)?;
        let meta = inner.meta_of(&root)?;
        trace!(revision = revision.0, "read.begin");
        Ok(Self {
            inner,
            root,
            meta,
            _guard: guard,
        })
    }

    /// Revision this transaction reads.
    pub fn revision(&self) -> Revision {
        self.root.revision()
    }

    /// Record stored under `key`.
    pub fn get(&self, key: NodeKey) -> Result<Option<Bytes>> {
        Ok(self
            .node_page(key.page_key())?
            .and_then(|page| page.get(key.slot()).cloned()))
    }

    /// Logical node page at `page_key`, rebuilt from its versions.
    pub fn node_page(&self, page_key: PageKey) -> Result<Option<Arc<NodePage>>> {
        match self.inner.newest_version(&self.root, page_key)?.key() {
            Some(newest) => self.inner.logical_page(newest).map(Some),
            None => Ok(None),
        }
    }

    /// Highest node key used up to this revision.
    pub fn max_node_key(&self) -> Option<NodeKey> {
        self.root.max_node_key()
    }

    /// Metadata entry `name`.
    pub fn meta(&self, name: &[u8]) -> Option<&[u8]> {
        self.meta.get(name)
    }

    /// All metadata entries in name order.
    pub fn meta_entries(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.meta.iter()
    }

    /// Node pages present in this revision.
    pub fn page_keys(&self) -> Result<Vec<PageKey>> {
        self.inner.page_keys(&self.root)
    }
}
