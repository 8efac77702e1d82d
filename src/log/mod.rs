#![forbid(unsafe_code)]
//! The write transaction's log of dirty pages.
//!
//! Each modified page lives here exactly once, under a [`LogKey`] derived
//! from its logical position, until the commit that persists it. The log
//! is never evicted: it grows with the transaction and is handed whole to
//! the commit as an immutable snapshot.

mod cache;

use std::collections::{BTreeMap, HashMap};

pub use cache::{CacheStats, PageCache};

use crate::page::{trie, Page};
use crate::types::{PageKey, Result, StratumError};

/// Which trie a logged page belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TreeKind {
    /// Trie of node pages, rooted in a revision root.
    Node,
    /// Trie of revision roots, rooted in the uber page.
    Revision,
}

/// Logical position of a dirty page.
///
/// `depth` counts levels above the leaves (0 for a node page) and `index`
/// is the leaf-index prefix the page covers at that depth, so keys stay
/// valid when a trie grows a new root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    /// Trie holding the page.
    pub tree: TreeKind,
    /// Levels above the leaves.
    pub depth: u8,
    /// Leaf-index prefix at `depth`.
    pub index: u64,
}

impl LogKey {
    /// Key of the node page at `page_key`.
    pub fn node(page_key: PageKey) -> Self {
        Self {
            tree: TreeKind::Node,
            depth: 0,
            index: page_key.0,
        }
    }

    /// Key of the indirect page at `depth` on the path to `leaf`.
    pub fn indirect(tree: TreeKind, depth: u8, leaf: u64) -> Self {
        Self {
            tree,
            depth,
            index: trie::prefix(leaf, depth),
        }
    }

    /// Key of child `offset` of this indirect page.
    pub fn child(&self, offset: usize) -> Self {
        Self {
            tree: self.tree,
            depth: self.depth.saturating_sub(1),
            index: (self.index << crate::types::FANOUT_EXP) | offset as u64,
        }
    }
}

/// Pair kept for each dirty page.
///
/// For node pages `complete` is the logical view and `modified` the
/// physical version to persist; the transaction writes into both. Other
/// pages are always written whole, so both sides stay identical.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogValue {
    /// Logical view.
    pub complete: Page,
    /// Version that will be written.
    pub modified: Page,
}

impl LogValue {
    /// Value whose modified side starts as a copy of `complete`.
    pub fn new(complete: Page) -> Self {
        Self {
            modified: complete.clone(),
            complete,
        }
    }

    /// Value with distinct logical and physical sides.
    pub fn split(complete: Page, modified: Page) -> Result<Self> {
        if complete.key() != modified.key() || complete.kind() != modified.kind() {
            return Err(StratumError::Precondition(
                "log value sides must share key and kind",
            ));
        }
        Ok(Self { complete, modified })
    }
}

/// Map from logical position to dirty page, one entry per key.
#[derive(Default, Debug)]
pub struct TransactionLog {
    entries: HashMap<LogKey, LogValue>,
}

impl TransactionLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry under `key`.
    pub fn get(&self, key: &LogKey) -> Option<&LogValue> {
        self.entries.get(key)
    }

    /// Mutable entry under `key`.
    pub fn get_mut(&mut self, key: &LogKey) -> Option<&mut LogValue> {
        self.entries.get_mut(key)
    }

    /// True if `key` already has an entry.
    pub fn contains(&self, key: &LogKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Creates the entry for `key` from `complete`, or returns the existing one untouched.
    pub fn put(&mut self, key: LogKey, complete: Page) -> &mut LogValue {
        self.entries
            .entry(key)
            .or_insert_with(|| LogValue::new(complete))
    }

    /// Inserts a prepared entry, or returns the existing one untouched.
    pub fn insert(&mut self, key: LogKey, value: LogValue) -> &mut LogValue {
        self.entries.entry(key).or_insert(value)
    }

    /// Entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&LogKey, &LogValue)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is logged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Consumes the log into a key-ordered map.
    pub fn into_ordered(self) -> BTreeMap<LogKey, LogValue> {
        self.entries.into_iter().collect()
    }
}
