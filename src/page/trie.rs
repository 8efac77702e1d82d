//! Addressing inside the two indirect-page tries.
//!
//! A trie of height `h` has `h` levels of indirect pages above its leaves
//! and addresses `FANOUT^h` leaves. Indirect pages are identified by their
//! distance from the leaves (`depth`, 1 for the parent of a leaf) and the
//! leaf-index prefix they cover, so growing the root never renames the
//! pages below it.

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, StratumError, FANOUT, FANOUT_EXP};

use super::{PageReference, PageSource};

/// Deepest trie supported; a tenth level would overflow `u64` addressing.
pub const MAX_HEIGHT: u8 = 9;

/// Root pointer and height of one trie.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrieRoot {
    /// Levels of indirect pages; 0 means the trie is empty.
    pub height: u8,
    /// Topmost indirect page.
    pub root: PageReference,
}

impl TrieRoot {
    /// Number of leaves addressable at the current height.
    pub fn capacity(&self) -> u64 {
        capacity(self.height)
    }

    /// True if `index` lies inside the addressable range.
    pub fn covers(&self, index: u64) -> bool {
        self.height > 0 && index < self.capacity()
    }

    /// Follows the indirect pages down to the leaf reference for `index`.
    pub fn lookup(&self, index: u64, source: &impl PageSource) -> Result<PageReference> {
        if !self.covers(index) {
            return Ok(PageReference::NULL);
        }
        let mut current = self.root;
        for depth in (1..=self.height).rev() {
            let Some(page) = current.resolve(source)? else {
                return Ok(PageReference::NULL);
            };
            let indirect = page.as_indirect()?;
            current = indirect.reference(child_offset(index, depth - 1));
        }
        Ok(current)
    }

    pub(crate) fn encode(&self, dst: &mut Vec<u8>) {
        ord::put_u8(dst, self.height);
        self.root.encode(dst);
    }

    pub(crate) fn decode(cur: &mut Cursor<'_>) -> Result<Self> {
        let height = cur.u8()?;
        if height > MAX_HEIGHT {
            return Err(StratumError::CorruptPage(format!(
                "trie height {height} exceeds {MAX_HEIGHT}"
            )));
        }
        let root = PageReference::decode(cur)?;
        if (height == 0) != root.is_null() {
            return Err(StratumError::CorruptPage(
                "trie height and root disagree".into(),
            ));
        }
        Ok(Self { height, root })
    }
}

/// Leaves addressable by a trie of `height` levels.
pub fn capacity(height: u8) -> u64 {
    1u64.checked_shl(FANOUT_EXP * u32::from(height))
        .unwrap_or(u64::MAX)
}

/// Smallest height whose trie addresses `index`.
pub fn height_for(index: u64) -> u8 {
    let mut height = 1;
    while index >= capacity(height) && height < MAX_HEIGHT {
        height += 1;
    }
    height
}

/// Prefix of `index` identifying the page at `depth` (0 is the leaf itself).
pub fn prefix(index: u64, depth: u8) -> u64 {
    index
        .checked_shr(FANOUT_EXP * u32::from(depth))
        .unwrap_or(0)
}

/// Offset within its parent of the page at `depth` on the path to `index`.
pub fn child_offset(index: u64, depth: u8) -> usize {
    (prefix(index, depth) & (FANOUT as u64 - 1)) as usize
}
