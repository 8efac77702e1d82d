use std::collections::BTreeMap;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, Revision, StorageKey, StratumError};

/// Small key/value map versioned alongside the node records.
///
/// The whole map is rewritten for every revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaPage {
    key: StorageKey,
    revision: Revision,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MetaPage {
    /// An empty map.
    pub fn new(key: StorageKey, revision: Revision) -> Self {
        Self {
            key,
            revision,
            entries: BTreeMap::new(),
        }
    }

    /// Full copy of this map for a later revision.
    pub fn copy_as(&self, key: StorageKey, revision: Revision) -> Self {
        Self {
            key,
            revision,
            entries: self.entries.clone(),
        }
    }

    /// Storage key this page is filed under.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    /// Revision that wrote this page.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Value under `name`.
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    /// Stores `value` under `name`, returning the replaced value.
    pub fn put(&mut self, name: &[u8], value: &[u8]) -> Option<Vec<u8>> {
        self.entries.insert(name.to_vec(), value.to_vec())
    }

    /// Drops `name`, returning its value.
    pub fn remove(&mut self, name: &[u8]) -> Option<Vec<u8>> {
        self.entries.remove(name)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn encode_body(&self, dst: &mut Vec<u8>) {
        ord::put_u64(dst, self.revision.0);
        ord::put_u32(dst, self.entries.len() as u32);
        for (name, value) in &self.entries {
            ord::put_len_prefixed(dst, name);
            ord::put_len_prefixed(dst, value);
        }
    }

    pub(crate) fn decode_body(key: StorageKey, cur: &mut Cursor<'_>) -> Result<Self> {
        let revision = Revision(cur.u64()?);
        let count = cur.u32()? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let name = cur.len_prefixed()?.to_vec();
            let value = cur.len_prefixed()?.to_vec();
            if entries.insert(name, value).is_some() {
                return Err(StratumError::CorruptPage("duplicate meta entry".into()));
            }
        }
        Ok(Self {
            key,
            revision,
            entries,
        })
    }
}
