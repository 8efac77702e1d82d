#![forbid(unsafe_code)]
//! Page persistence.
//!
//! A [`BlobStore`] keeps opaque byte blobs under storage keys plus one root
//! slot for the uber page. [`Backend`] layers the page codec and the byte
//! handler pipeline on top, so stores never see page structure.

mod dual;
mod file;
mod memory;
mod object;
pub mod pipeline;

use std::sync::Arc;

use tracing::{debug, trace};

pub use dual::DualStore;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use object::{DirectoryObjectClient, ObjectClient, ObjectStore};
pub use pipeline::{ByteHandler, ByteHandlerPipeline, ChaChaEncryptor, SnappyCompressor};

use crate::page::{Page, UberPage};
use crate::types::{Result, StorageKey, StratumError};

/// Key/blob storage underneath a resource.
///
/// `put` may buffer; `sync` makes every earlier `put` durable. `put_root`
/// replaces the root blob durably and only after everything written before
/// it is durable, which makes it the publication point of a revision.
pub trait BlobStore: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;
    /// Blob stored under `key`, if any.
    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>>;
    /// Stores `bytes` under `key`.
    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()>;
    /// Current root blob, if one was ever published.
    fn get_root(&self) -> Result<Option<Vec<u8>>>;
    /// Durably replaces the root blob.
    fn put_root(&self, bytes: &[u8]) -> Result<()>;
    /// Makes earlier writes durable.
    fn sync(&self) -> Result<()>;
    /// Releases resources; later calls fail with [`StratumError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Page-level access to a [`BlobStore`].
pub struct Backend {
    store: Arc<dyn BlobStore>,
    pipeline: ByteHandlerPipeline,
}

impl Backend {
    /// Wraps `store`, running every blob through `pipeline`.
    pub fn new(store: Arc<dyn BlobStore>, pipeline: ByteHandlerPipeline) -> Self {
        Self { store, pipeline }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Pipeline applied to every blob.
    pub fn pipeline(&self) -> &ByteHandlerPipeline {
        &self.pipeline
    }

    /// Reads and decodes the page stored under `key`.
    pub fn read(&self, key: StorageKey) -> Result<Page> {
        let blob = self
            .store
            .get(key)?
            .ok_or_else(|| StratumError::CorruptPage(format!("no page stored under {key}")))?;
        let page = Page::decode(&self.pipeline.deserialize(blob)?)?;
        if page.key() != key {
            return Err(StratumError::CorruptPage(format!(
                "page stored under {key} claims to be {}",
                page.key()
            )));
        }
        trace!(key = key.0, kind = %page.kind(), "backend.read");
        Ok(page)
    }

    /// Encodes and stores `page` under its own key.
    pub fn write(&self, page: &Page) -> Result<()> {
        let blob = self.pipeline.serialize(page.encode())?;
        trace!(key = page.key().0, kind = %page.kind(), bytes = blob.len(), "backend.write");
        self.store.put(page.key(), &blob)
    }

    /// Most recently published uber page, if any.
    pub fn read_uber(&self) -> Result<Option<UberPage>> {
        let Some(blob) = self.store.get_root()? else {
            return Ok(None);
        };
        match Page::decode(&self.pipeline.deserialize(blob)?)? {
            Page::Uber(uber) => Ok(Some(uber)),
            other => Err(StratumError::CorruptPage(format!(
                "root slot holds a {} page",
                other.kind()
            ))),
        }
    }

    /// Publishes `uber` as the new root.
    pub fn write_uber(&self, uber: &UberPage) -> Result<()> {
        let blob = self.pipeline.serialize(Page::Uber(uber.clone()).encode())?;
        self.store.put_root(&blob)?;
        debug!(
            revisions = uber.revision_count(),
            store = self.store.name(),
            "backend.uber_published"
        );
        Ok(())
    }

    /// Makes earlier writes durable.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Closes the underlying store.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}
