use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::types::{Result, StorageKey, StratumError};

use super::BlobStore;

/// Volatile store for tests and scratch resources.
#[derive(Default)]
pub struct MemoryStore {
    blobs: RwLock<HashMap<StorageKey, Vec<u8>>>,
    root: RwLock<Option<Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs, not counting the root.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True when no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StratumError::Closed);
        }
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.blobs.read().get(&key).cloned())
    }

    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        self.blobs.write().insert(key, bytes.to_vec());
        Ok(())
    }

    fn get_root(&self) -> Result<Option<Vec<u8>>> {
        self.check_open()?;
        Ok(self.root.read().clone())
    }

    fn put_root(&self, bytes: &[u8]) -> Result<()> {
        self.check_open()?;
        *self.root.write() = Some(bytes.to_vec());
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
