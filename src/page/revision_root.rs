use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{NodeKey, Result, Revision, StorageKey, StratumError};

use super::{PageReference, TrieRoot};

/// Per-revision root: the node trie and the metadata page of one revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RevisionRootPage {
    key: StorageKey,
    revision: Revision,
    max_node_key: Option<u64>,
    node_tree: TrieRoot,
    meta: PageReference,
}

impl RevisionRootPage {
    /// Root of an empty revision.
    pub fn new(key: StorageKey, revision: Revision, meta: StorageKey) -> Self {
        Self {
            key,
            revision,
            max_node_key: None,
            node_tree: TrieRoot::default(),
            meta: PageReference::to(meta),
        }
    }

    /// Root for `revision` derived from this one; node trie and key counter carry over.
    pub fn successor(&self, key: StorageKey, revision: Revision, meta: StorageKey) -> Self {
        Self {
            key,
            revision,
            max_node_key: self.max_node_key,
            node_tree: self.node_tree,
            meta: PageReference::to(meta),
        }
    }

    /// Storage key this page is filed under.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    /// Revision described by this root.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Highest node key handed out or written so far, if any.
    pub fn max_node_key(&self) -> Option<NodeKey> {
        self.max_node_key.map(NodeKey)
    }

    /// Hands out the key after the highest one in use.
    ///
    /// Fails once `u64::MAX` has been used.
    pub fn allocate_node_key(&mut self) -> Result<NodeKey> {
        let next = match self.max_node_key {
            None => 0,
            Some(max) => max
                .checked_add(1)
                .ok_or(StratumError::Invalid("node key space exhausted"))?,
        };
        self.max_node_key = Some(next);
        Ok(NodeKey(next))
    }

    /// Makes sure future allocations never return `key` or anything below it.
    pub fn reserve_node_key(&mut self, key: NodeKey) {
        self.max_node_key = Some(self.max_node_key.map_or(key.0, |max| max.max(key.0)));
    }

    /// Trie of node pages.
    pub fn node_tree(&self) -> &TrieRoot {
        &self.node_tree
    }

    /// Mutable access to the node trie.
    pub fn node_tree_mut(&mut self) -> &mut TrieRoot {
        &mut self.node_tree
    }

    /// Reference to this revision's metadata page.
    pub fn meta(&self) -> PageReference {
        self.meta
    }

    pub(crate) fn encode_body(&self, dst: &mut Vec<u8>) {
        ord::put_u64(dst, self.revision.0);
        match self.max_node_key {
            Some(max) => {
                ord::put_u8(dst, 1);
                ord::put_u64(dst, max);
            }
            None => {
                ord::put_u8(dst, 0);
                ord::put_u64(dst, 0);
            }
        }
        self.node_tree.encode(dst);
        self.meta.encode(dst);
    }

    pub(crate) fn decode_body(key: StorageKey, cur: &mut Cursor<'_>) -> Result<Self> {
        let revision = Revision(cur.u64()?);
        let has_max = cur.u8()?;
        let max = cur.u64()?;
        let max_node_key = match has_max {
            0 => None,
            1 => Some(max),
            other => {
                return Err(StratumError::CorruptPage(format!(
                    "revision root {key} has node key marker {other}"
                )))
            }
        };
        Ok(Self {
            key,
            revision,
            max_node_key,
            node_tree: TrieRoot::decode(cur)?,
            meta: PageReference::decode(cur)?,
        })
    }
}
