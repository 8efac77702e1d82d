use bytes::Bytes;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{PageKey, Result, Revision, StorageKey, StratumError, SLOT_COUNT};

/// Content of one record slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Slot {
    /// Nothing recorded in this version.
    #[default]
    Empty,
    /// A live record.
    Present(Bytes),
    /// The record was removed; shadows older versions.
    Removed,
}

impl Slot {
    /// True unless the slot is [`Slot::Empty`].
    pub fn is_set(&self) -> bool {
        !matches!(self, Slot::Empty)
    }

    /// Live payload, if any.
    pub fn value(&self) -> Option<&Bytes> {
        match self {
            Slot::Present(bytes) => Some(bytes),
            _ => None,
        }
    }
}

const SLOT_EMPTY: u8 = 0;
const SLOT_PRESENT: u8 = 1;
const SLOT_REMOVED: u8 = 2;

/// One version of a fixed-capacity page of node records.
///
/// A version is either `full` (every live record of the page is present)
/// or a delta holding only what the revisioning strategy chose to write.
/// `previous` links to the version this one was derived from, forming the
/// chain that reconstruction walks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodePage {
    key: StorageKey,
    page_key: PageKey,
    revision: Revision,
    previous: Option<StorageKey>,
    full: bool,
    slots: Vec<Slot>,
}

impl NodePage {
    /// A brand-new, empty and complete page.
    pub fn new(key: StorageKey, page_key: PageKey, revision: Revision) -> Self {
        Self {
            key,
            page_key,
            revision,
            previous: None,
            full: true,
            slots: vec![Slot::Empty; SLOT_COUNT],
        }
    }

    /// An empty delta derived from `previous`.
    pub fn delta(
        key: StorageKey,
        page_key: PageKey,
        revision: Revision,
        previous: StorageKey,
    ) -> Self {
        Self {
            key,
            page_key,
            revision,
            previous: Some(previous),
            full: false,
            slots: vec![Slot::Empty; SLOT_COUNT],
        }
    }

    /// Storage key this version is filed under.
    pub fn key(&self) -> StorageKey {
        self.key
    }

    /// Logical page position.
    pub fn page_key(&self) -> PageKey {
        self.page_key
    }

    /// Revision that wrote this version.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Older version this one derives from.
    pub fn previous(&self) -> Option<StorageKey> {
        self.previous
    }

    /// True if this version needs no older version to be read.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Restamps identity and lineage, keeping the slots.
    pub fn restamp(
        mut self,
        key: StorageKey,
        revision: Revision,
        previous: Option<StorageKey>,
        full: bool,
    ) -> Self {
        self.key = key;
        self.revision = revision;
        self.previous = previous;
        self.full = full;
        self
    }

    /// Slot at `index`.
    pub fn slot(&self, index: usize) -> &Slot {
        static EMPTY: Slot = Slot::Empty;
        self.slots.get(index).unwrap_or(&EMPTY)
    }

    /// All slots in order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Live record at `index`.
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.slot(index).value()
    }

    /// Overwrites slot `index`.
    pub fn set_slot(&mut self, index: usize, slot: Slot) -> Result<()> {
        let target = self
            .slots
            .get_mut(index)
            .ok_or(StratumError::Invalid("slot index out of range"))?;
        *target = slot;
        Ok(())
    }

    /// Number of slots that are not empty.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_set()).count()
    }

    pub(crate) fn encode_body(&self, dst: &mut Vec<u8>) {
        ord::put_u64(dst, self.page_key.0);
        ord::put_u64(dst, self.revision.0);
        ord::put_u64(dst, self.previous.map_or(0, |key| key.0));
        ord::put_u8(dst, u8::from(self.full));
        ord::put_u32(dst, self.slots.len() as u32);
        for slot in &self.slots {
            match slot {
                Slot::Empty => ord::put_u8(dst, SLOT_EMPTY),
                Slot::Present(bytes) => {
                    ord::put_u8(dst, SLOT_PRESENT);
                    ord::put_len_prefixed(dst, bytes);
                }
                Slot::Removed => ord::put_u8(dst, SLOT_REMOVED),
            }
        }
    }

    pub(crate) fn decode_body(key: StorageKey, cur: &mut Cursor<'_>) -> Result<Self> {
        let page_key = PageKey(cur.u64()?);
        let revision = Revision(cur.u64()?);
        let previous = match cur.u64()? {
            0 => None,
            raw => Some(StorageKey(raw)),
        };
        let full = match cur.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(StratumError::CorruptPage(format!(
                    "invalid full flag {other}"
                )))
            }
        };
        let count = cur.u32()? as usize;
        if count != SLOT_COUNT {
            return Err(StratumError::CorruptPage(format!(
                "node page holds {count} slots, expected {SLOT_COUNT}"
            )));
        }
        let mut slots = Vec::with_capacity(count);
        for _ in 0..count {
            let slot = match cur.u8()? {
                SLOT_EMPTY => Slot::Empty,
                SLOT_PRESENT => Slot::Present(Bytes::copy_from_slice(cur.len_prefixed()?)),
                SLOT_REMOVED => Slot::Removed,
                other => {
                    return Err(StratumError::CorruptPage(format!(
                        "invalid slot marker {other}"
                    )))
                }
            };
            slots.push(slot);
        }
        Ok(Self {
            key,
            page_key,
            revision,
            previous,
            full,
            slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_page_is_full_and_empty() {
        let page = NodePage::new(StorageKey(1), PageKey(0), Revision(0));
        assert!(page.is_full());
        assert_eq!(page.occupied(), 0);
        assert_eq!(page.slots().len(), SLOT_COUNT);
    }

    #[test]
    fn removed_slot_has_no_value() {
        let mut page = NodePage::delta(StorageKey(2), PageKey(0), Revision(1), StorageKey(1));
        page.set_slot(3, Slot::Removed).unwrap();
        page.set_slot(4, Slot::Present(Bytes::from_static(b"x")))
            .unwrap();
        assert!(page.get(3).is_none());
        assert!(page.slot(3).is_set());
        assert_eq!(page.get(4).unwrap().as_ref(), b"x");
        assert_eq!(page.occupied(), 2);
        assert!(page.set_slot(SLOT_COUNT, Slot::Removed).is_err());
    }
}
