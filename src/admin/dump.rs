use std::path::Path;

use serde::Serialize;

use crate::access::Session;
use crate::page::Slot;
use crate::types::{PageKey, Result, Revision, SLOT_COUNT_EXP};

const PREVIEW_BYTES: usize = 16;

/// One occupied slot of a dumped page.
#[derive(Clone, Debug, Serialize)]
pub struct DumpSlot {
    /// Slot index within the page.
    pub slot: usize,
    /// Node key addressing the slot.
    pub node_key: u64,
    /// Record length in bytes.
    pub len: usize,
    /// Hex of the first bytes of the record.
    pub preview: String,
}

/// Live records of one logical node page.
#[derive(Clone, Debug, Serialize)]
pub struct DumpReport {
    /// Revision read.
    pub revision: u64,
    /// Page dumped.
    pub page_key: u64,
    /// False when the page does not exist in the revision.
    pub present: bool,
    /// Occupied slots in order.
    pub slots: Vec<DumpSlot>,
}

/// Lists the records of `page_key` as of `revision`, or the newest revision.
pub fn dump(dir: impl AsRef<Path>, revision: Option<u64>, page_key: u64) -> Result<DumpReport> {
    let session = Session::open(dir)?;
    let report = {
        let read = match revision {
            Some(revision) => session.begin_read_at(Revision(revision))?,
            None => session.begin_read()?,
        };
        let page = read.node_page(PageKey(page_key))?;
        let slots = page
            .as_deref()
            .map(|page| {
                page.slots()
                    .iter()
                    .enumerate()
                    .filter_map(|(slot, content)| match content {
                        Slot::Present(bytes) => Some(DumpSlot {
                            slot,
                            node_key: (page_key << SLOT_COUNT_EXP) | slot as u64,
                            len: bytes.len(),
                            preview: hex::encode(&bytes[..bytes.len().min(PREVIEW_BYTES)]),
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        DumpReport {
            revision: read.revision().0,
            page_key,
            present: page.is_some(),
            slots,
        }
    };
    session.close()?;
    Ok(report)
}
