use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, StorageKey, StratumError, FANOUT};

use super::PageReference;

/// Fixed fan-out array of child references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndirectPage {
    key: StorageKey,
    references: Vec<PageReference>,
}

impl IndirectPage {
    /// An indirect page with every reference null.
    pub fn new(key: StorageKey) -> Self {
        Self {
            key,
            references: vec![PageReference::NULL; FANOUT],
        }
    }

    /// Storage key this page is filed under.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    /// Copy of this page filed under a new key, as done on first modification.
    pub fn copy_as(&self, key: StorageKey) -> Self {
        Self {
            key,
            references: self.references.clone(),
        }
    }

    /// Reference at `offset`.
    pub fn reference(&self, offset: usize) -> PageReference {
        self.references
            .get(offset)
            .copied()
            .unwrap_or(PageReference::NULL)
    }

    /// Points `offset` at `key`.
    pub fn set_reference(&mut self, offset: usize, reference: PageReference) -> Result<()> {
        let slot = self
            .references
            .get_mut(offset)
            .ok_or(StratumError::Invalid("indirect offset out of range"))?;
        *slot = reference;
        Ok(())
    }

    /// Non-null references with their offsets.
    pub fn children(&self) -> impl Iterator<Item = (usize, StorageKey)> + '_ {
        self.references
            .iter()
            .enumerate()
            .filter_map(|(offset, reference)| reference.key().map(|key| (offset, key)))
    }

    pub(crate) fn encode_body(&self, dst: &mut Vec<u8>) {
        ord::put_u32(dst, self.references.len() as u32);
        for reference in &self.references {
            reference.encode(dst);
        }
    }

    pub(crate) fn decode_body(key: StorageKey, cur: &mut Cursor<'_>) -> Result<Self> {
        let count = cur.u32()? as usize;
        if count != FANOUT {
            return Err(StratumError::CorruptPage(format!(
                "indirect page holds {count} references, expected {FANOUT}"
            )));
        }
        let mut references = Vec::with_capacity(count);
        for _ in 0..count {
            references.push(PageReference::decode(cur)?);
        }
        Ok(Self { key, references })
    }
}
