use std::sync::Arc;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, StorageKey};

use super::Page;

/// Anything that can produce a persisted page by its storage key.
pub trait PageSource {
    /// Loads the page filed under `key`.
    fn load(&self, key: StorageKey) -> Result<Arc<Page>>;
}

/// Pointer from a parent page to a child page.
///
/// Storage keys are allocated when a page enters the write log, so a
/// reference always names its target by key. Whether the target is still
/// dirty is decided by the log holding it, not by the reference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PageReference {
    key: Option<StorageKey>,
}

impl PageReference {
    /// A reference to nothing.
    pub const NULL: PageReference = PageReference { key: None };

    /// A reference to the page filed under `key`.
    pub fn to(key: StorageKey) -> Self {
        Self { key: Some(key) }
    }

    /// Target key, if any.
    pub fn key(&self) -> Option<StorageKey> {
        self.key
    }

    /// True when the reference points nowhere.
    pub fn is_null(&self) -> bool {
        self.key.is_none()
    }

    /// Retargets the reference.
    pub fn set(&mut self, key: StorageKey) {
        self.key = Some(key);
    }

    /// Loads the target page through `source`.
    pub fn resolve(&self, source: &impl PageSource) -> Result<Option<Arc<Page>>> {
        match self.key {
            Some(key) => source.load(key).map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn encode(&self, dst: &mut Vec<u8>) {
        ord::put_u64(dst, self.key.map_or(0, |key| key.0));
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let raw = cur.u64()?;
        Ok(if raw == 0 {
            PageReference::NULL
        } else {
            PageReference::to(StorageKey(raw))
        })
    }
}
