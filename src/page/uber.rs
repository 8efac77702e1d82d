use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, Revision, StorageKey, StratumError};

use super::TrieRoot;

/// Root of the whole resource, rewritten by every commit.
///
/// Publishing an uber page is the atomic step that makes a revision
/// visible. It owns the storage-key counter so keys can be handed out
/// before any page reaches the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UberPage {
    key: StorageKey,
    revision_count: u64,
    next_storage_key: u64,
    revision_tree: TrieRoot,
}

impl UberPage {
    /// Uber page of a resource with no revisions yet.
    pub fn empty() -> Self {
        Self {
            key: StorageKey(0),
            revision_count: 0,
            next_storage_key: 1,
            revision_tree: TrieRoot::default(),
        }
    }

    /// Storage key assigned to this uber page.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    /// Number of committed revisions.
    pub fn revision_count(&self) -> u64 {
        self.revision_count
    }

    /// Newest committed revision, if any.
    pub fn latest_revision(&self) -> Option<Revision> {
        self.revision_count.checked_sub(1).map(Revision)
    }

    /// Trie indexing revision root pages by revision number.
    pub fn revision_tree(&self) -> &TrieRoot {
        &self.revision_tree
    }

    /// Mutable access to the revision trie.
    pub fn revision_tree_mut(&mut self) -> &mut TrieRoot {
        &mut self.revision_tree
    }

    /// Counter value handed out by the next allocation.
    pub fn next_storage_key(&self) -> u64 {
        self.next_storage_key
    }

    /// Hands out a fresh storage key.
    pub fn allocate_key(&mut self) -> StorageKey {
        let key = StorageKey(self.next_storage_key);
        self.next_storage_key += 1;
        key
    }

    /// Successor uber page for the revision after this one.
    pub fn successor(&self) -> Self {
        let mut next = Self {
            key: StorageKey(0),
            revision_count: self.revision_count + 1,
            next_storage_key: self.next_storage_key,
            revision_tree: self.revision_tree,
        };
        next.key = next.allocate_key();
        next
    }

    pub(crate) fn encode_body(&self, dst: &mut Vec<u8>) {
        ord::put_u64(dst, self.revision_count);
        ord::put_u64(dst, self.next_storage_key);
        self.revision_tree.encode(dst);
    }

    pub(crate) fn decode_body(key: StorageKey, cur: &mut Cursor<'_>) -> Result<Self> {
        let revision_count = cur.u64()?;
        let next_storage_key = cur.u64()?;
        if next_storage_key <= key.0 {
            return Err(StratumError::CorruptPage(
                "uber page key counter behind its own key".into(),
            ));
        }
        let revision_tree = TrieRoot::decode(cur)?;
        Ok(Self {
            key,
            revision_count,
            next_storage_key,
            revision_tree,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_allocates_its_own_key() {
        let empty = UberPage::empty();
        assert_eq!(empty.latest_revision(), None);
        let first = empty.successor();
        assert_eq!(first.revision_count(), 1);
        assert_eq!(first.latest_revision(), Some(Revision(0)));
        assert_eq!(first.key(), StorageKey(1));
        assert_eq!(first.next_storage_key(), 2);
    }
}
