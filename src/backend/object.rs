use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;
use tracing::trace;

use crate::types::{Result, StorageKey, StratumError};

use super::BlobStore;

const ROOT_OBJECT: &str = "uber";

/// Minimal object-storage surface: whole-object put and get by name.
///
/// Puts must be atomic: a reader sees either the old object or the new one.
pub trait ObjectClient: Send + Sync {
    /// Stores `bytes` as object `name`, replacing any previous object.
    fn put_object(&self, name: &str, bytes: &[u8]) -> Result<()>;
    /// Fetches object `name`.
    fn get_object(&self, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Object client backed by a local directory, one file per object.
#[derive(Clone, Debug)]
pub struct DirectoryObjectClient {
    root: PathBuf,
}

impl DirectoryObjectClient {
    /// Client rooted at `root`, created if missing.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ObjectClient for DirectoryObjectClient {
    fn put_object(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(name);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|err| StratumError::Io(err.error))?;
        Ok(())
    }

    fn get_object(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.object_path(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Store keeping each page as its own object.
pub struct ObjectStore<C> {
    client: C,
    closed: AtomicBool,
}

impl<C: ObjectClient> ObjectStore<C> {
    /// Store over `client`.
    pub fn new(client: C) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    fn page_object(key: StorageKey) -> String {
        format!("pages/{:020}", key.0)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StratumError::Closed);
        }
        Ok(())
    }
}

impl<C: ObjectClient> BlobStore for ObjectStore<C> {
    fn name(&self) -> &'static str {
        "object"
    }

    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.client.get_object(&Self::page_object(key))
    }

    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        let name = Self::page_object(key);
        trace!(object = %name, bytes = bytes.len(), "object_store.put");
        self.client.put_object(&name, bytes)
    }

    fn get_root(&self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        self.client.get_object(ROOT_OBJECT)
    }

    fn put_root(&self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.client.put_object(ROOT_OBJECT, bytes)
    }

    fn sync(&self) -> Result<()> {
        // Every put is already durable.
        self.check_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
