use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BlobStore};
use crate::commit::{strategy_for, CommitContext, CommitStrategy};
use crate::log::{CacheStats, PageCache};
use crate::page::{MetaPage, NodePage, Page, PageReference, PageSource, RevisionRootPage, UberPage};
use crate::primitives::concurrency::{LockSnapshot, PublishGate, SingleWriter};
use crate::revisioning::Revisioning;
use crate::types::{PageKey, Result, Revision, StorageKey, StratumError};

use super::config::{ResourceConfig, CONFIG_FILE};
use super::read::ReadTransaction;
use super::write::WriteTransaction;

/// Handle on one open resource.
///
/// Cheap to share behind an `Arc`; every transaction keeps the resource
/// state alive on its own.
pub struct Session {
    inner: Arc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) config: ResourceConfig,
    pub(crate) backend: Arc<Backend>,
    pub(crate) commit: Box<dyn CommitStrategy>,
    pub(crate) published: Arc<RwLock<Arc<UberPage>>>,
    /// Newest dispatched uber page; ahead of `published` while commits are in flight.
    pub(crate) head: Mutex<Arc<UberPage>>,
    pub(crate) lock: SingleWriter,
    pages: PageCache<Arc<Page>>,
    logical: PageCache<Arc<NodePage>>,
    location: Option<PathBuf>,
    closed: AtomicBool,
}

impl Session {
    /// Creates a new resource and commits its bootstrap revision 0.
    pub fn create(config: ResourceConfig) -> Result<Session> {
        config.validate()?;
        if let Some(dir) = config.backend.location() {
            if Self::exists(dir) {
                return Err(StratumError::Config(format!(
                    "a resource already exists at {}",
                    dir.display()
                )));
            }
        }
        let store = config.open_store()?;
        let session = Self::create_with_store(config, store)?;
        if let Some(dir) = &session.inner.location {
            session.inner.config.save(dir)?;
        }
        Ok(session)
    }

    /// Creates a new resource over an already opened store.
    pub fn create_with_store(config: ResourceConfig, store: Arc<dyn BlobStore>) -> Result<Session> {
        config.validate()?;
        let backend = Arc::new(Backend::new(store, config.build_pipeline()?));
        if backend.read_uber()?.is_some() {
            return Err(StratumError::Config(
                "store already holds a resource".into(),
            ));
        }
        let session = Self::assemble(config, backend, UberPage::empty());
        {
            let mut bootstrap = session.begin_write()?;
            bootstrap.commit()?;
        }
        session.wait_for_commits()?;
        info!(
            revisioning = %session.inner.config.revisioning,
            window = session.inner.config.window,
            store = session.inner.backend.store().name(),
            "session.created"
        );
        Ok(session)
    }

    /// Opens the resource whose configuration is recorded in `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Session> {
        let config = ResourceConfig::load(dir.as_ref())?;
        let store = config.open_store()?;
        Self::open_with_store(config, store)
    }

    /// Opens a resource over an already opened store.
    pub fn open_with_store(config: ResourceConfig, store: Arc<dyn BlobStore>) -> Result<Session> {
        config.validate()?;
        let backend = Arc::new(Backend::new(store, config.build_pipeline()?));
        let uber = backend
            .read_uber()?
            .ok_or_else(|| StratumError::Config("store holds no published revision".into()))?;
        if uber.revision_count() == 0 {
            return Err(StratumError::CorruptPage(
                "published uber page has no revisions".into(),
            ));
        }
        info!(
            revisions = uber.revision_count(),
            store = backend.store().name(),
            "session.opened"
        );
        Ok(Self::assemble(config, backend, uber))
    }

    /// Opens the resource described by `config`, creating it if missing.
    ///
    /// An existing resource must have been created with exactly `config`.
    pub fn open_or_create(config: ResourceConfig) -> Result<Session> {
        let Some(dir) = config.backend.location().map(Path::to_path_buf) else {
            return Self::create(config);
        };
        if !Self::exists(&dir) {
            return Self::create(config);
        }
        let recorded = ResourceConfig::load(&dir)?;
        if recorded != config {
            return Err(StratumError::Config(format!(
                "resource at {} was created with a different configuration",
                dir.display()
            )));
        }
        Self::open(&dir)
    }

    /// True if `dir` holds a recorded resource configuration.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(CONFIG_FILE).is_file()
    }

    fn assemble(config: ResourceConfig, backend: Arc<Backend>, uber: UberPage) -> Session {
        let uber = Arc::new(uber);
        let published = Arc::new(RwLock::new(Arc::clone(&uber)));
        let ctx = CommitContext {
            backend: Arc::clone(&backend),
            gate: Arc::new(PublishGate::new(Revision(uber.revision_count()))),
            published: Arc::clone(&published),
            publish_timeout: config.close_timeout(),
        };
        let commit = strategy_for(config.commit, ctx);
        let shards = config.cache_shards;
        let capacity = config.cache_pages;
        let location = config.backend.location().map(Path::to_path_buf);
        Session {
            inner: Arc::new(SessionInner {
                backend,
                commit,
                published,
                head: Mutex::new(uber),
                lock: SingleWriter::new(),
                pages: PageCache::new(shards, capacity),
                logical: PageCache::new(shards, capacity),
                location,
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// Configuration the resource runs with.
    pub fn config(&self) -> &ResourceConfig {
        &self.inner.config
    }

    /// Page-level backend the resource writes through.
    pub fn backend(&self) -> &Backend {
        &self.inner.backend
    }

    /// Number of published revisions.
    pub fn revision_count(&self) -> u64 {
        self.inner.published.read().revision_count()
    }

    /// Newest published revision.
    pub fn latest_revision(&self) -> Result<Revision> {
        self.inner
            .published
            .read()
            .latest_revision()
            .ok_or(StratumError::Precondition("resource has no published revision"))
    }

    /// Opens a read transaction on the newest published revision.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        let revision = self.latest_revision()?;
        self.begin_read_at(revision)
    }

    /// Opens a read transaction pinned to `revision`.
    pub fn begin_read_at(&self, revision: Revision) -> Result<ReadTransaction> {
        self.inner.ensure_open()?;
        ReadTransaction::begin(Arc::clone(&self.inner), revision)
    }

    /// Opens the write transaction; fails if one is already open.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        self.inner.ensure_open()?;
        WriteTransaction::begin(Arc::clone(&self.inner))
    }

    /// Waits until every dispatched commit has been published.
    pub fn wait_for_commits(&self) -> Result<()> {
        self.inner
            .commit
            .wait_idle(self.inner.config.close_timeout())
    }

    /// Current reader and writer counts.
    pub fn locks(&self) -> LockSnapshot {
        self.inner.lock.snapshot()
    }

    /// Read cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner.pages.stats()
    }

    /// Drains in-flight commits and closes the backend.
    pub fn close(self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let drained = self.inner.commit.close(self.inner.config.close_timeout());
        if let Err(err) = &drained {
            warn!(error = %err, "session.close_commit_drain_failed");
        }
        self.inner.backend.close()?;
        debug!("session.closed");
        drained
    }
}

impl SessionInner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StratumError::Closed);
        }
        Ok(())
    }

    /// Forgets everything cached after a failed commit released its storage keys.
    pub(crate) fn forget_cached(&self) {
        self.pages.clear();
        self.logical.clear();
    }

    /// Drops dispatched-but-unpublished state and returns the published uber page.
    pub(crate) fn rebase_on_published(&self) -> Arc<UberPage> {
        let published = Arc::clone(&self.published.read());
        *self.head.lock() = Arc::clone(&published);
        self.forget_cached();
        published
    }

    pub(crate) fn revisioning(&self) -> Revisioning {
        self.config.revisioning
    }

    pub(crate) fn window(&self) -> usize {
        self.config.window
    }

    /// Revision root of `revision` reachable from `uber`.
    pub(crate) fn revision_root(&self, uber: &UberPage, revision: Revision) -> Result<RevisionRootPage> {
        let reference = uber.revision_tree().lookup(revision.0, self)?;
        let page = reference.resolve(self)?.ok_or_else(|| {
            StratumError::CorruptPage(format!("revision {revision} missing from revision trie"))
        })?;
        let root = page.as_revision_root()?;
        if root.revision() != revision {
            return Err(StratumError::CorruptPage(format!(
                "revision trie maps {revision} to a root of {}",
                root.revision()
            )));
        }
        Ok(root.clone())
    }

    /// Metadata page referenced by `root`.
    pub(crate) fn meta_of(&self, root: &RevisionRootPage) -> Result<MetaPage> {
        let page = root
            .meta()
            .resolve(self)?
            .ok_or_else(|| StratumError::CorruptPage(format!("{} has no metadata page", root.revision())))?;
        Ok(page.as_meta()?.clone())
    }

    /// Newest physical version of `page_key` reachable from `root`.
    pub(crate) fn newest_version(
        &self,
        root: &RevisionRootPage,
        page_key: PageKey,
    ) -> Result<PageReference> {
        root.node_tree().lookup(page_key.0, self)
    }

    /// Physical versions of a page newest first, as many as the strategy consults.
    pub(crate) fn load_versions(&self, newest: StorageKey) -> Result<Vec<NodePage>> {
        let revisioning = self.revisioning();
        let depth = revisioning.versions_to_read(self.window());
        let mut versions: Vec<NodePage> = Vec::with_capacity(depth);
        let mut next = Some(newest);
        while let Some(key) = next {
            if versions.len() == depth {
                break;
            }
            let page = self.load(key)?;
            let node = page.as_node()?;
            if let Some(last) = versions.last() {
                if node.page_key() != last.page_key() || node.revision() >= last.revision() {
                    return Err(StratumError::InconsistentHistory(format!(
                        "version chain of page {} steps from {} to {}",
                        last.page_key(),
                        last.revision(),
                        node.revision()
                    )));
                }
            }
            next = node.previous();
            let stop = node.is_full() && revisioning != Revisioning::SlidingSnapshot;
            versions.push(node.clone());
            if stop {
                break;
            }
        }
        Ok(versions)
    }

    /// Logical page whose newest physical version is filed under `newest`.
    pub(crate) fn logical_page(&self, newest: StorageKey) -> Result<Arc<NodePage>> {
        if let Some(page) = self.logical.get(newest) {
            return Ok(page);
        }
        let versions = self.load_versions(newest)?;
        let page = Arc::new(self.revisioning().reconstruct(&versions, self.window())?);
        self.logical.insert(newest, Arc::clone(&page));
        Ok(page)
    }

    /// Page keys present in the node trie of `root`, ascending.
    pub(crate) fn page_keys(&self, root: &RevisionRootPage) -> Result<Vec<PageKey>> {
        let tree = root.node_tree();
        let mut out = Vec::new();
        if tree.height > 0 {
            self.collect_leaves(tree.root, tree.height, 0, &mut out)?;
        }
        Ok(out)
    }

    fn collect_leaves(
        &self,
        reference: PageReference,
        depth: u8,
        prefix: u64,
        out: &mut Vec<PageKey>,
    ) -> Result<()> {
        let Some(page) = reference.resolve(self)? else {
            return Ok(());
        };
        for (offset, child) in page.as_indirect()?.children() {
            let index = (prefix << crate::types::FANOUT_EXP) | offset as u64;
            if depth == 1 {
                out.push(PageKey(index));
            } else {
                self.collect_leaves(PageReference::to(child), depth - 1, index, out)?;
            }
        }
        Ok(())
    }
}

impl PageSource for SessionInner {
    fn load(&self, key: StorageKey) -> Result<Arc<Page>> {
        if let Some(page) = self.commit.page_in_progress(key) {
            return Ok(Arc::new(page));
        }
        if let Some(page) = self.pages.get(key) {
            return Ok(page);
        }
        let page = Arc::new(self.backend.read(key)?);
        self.pages.insert(key, Arc::clone(&page));
        Ok(page)
    }
}
