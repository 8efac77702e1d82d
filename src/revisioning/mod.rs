#![forbid(unsafe_code)]
//! Revisioning strategies: how physical versions of a node page are stored
//! and how the logical page is rebuilt from them.
//!
//! Every function here is pure. Callers hand in the physical versions of a
//! single page ordered newest first (as found by walking the `previous`
//! chain) and receive either the logical page or the pair of pages a write
//! transaction needs to modify it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::page::{NodePage, Slot};
use crate::types::{Result, Revision, StorageKey, StratumError, SLOT_COUNT};

/// Strategy used to version node pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Revisioning {
    /// Every version is complete.
    FullDump,
    /// Complete bases plus cumulative diffs against the latest base.
    Differential,
    /// Complete bases plus per-revision deltas.
    Incremental,
    /// Per-revision deltas merged over a sliding window, never re-dumped.
    SlidingSnapshot,
}

impl fmt::Display for Revisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Revisioning::FullDump => "full-dump",
            Revisioning::Differential => "differential",
            Revisioning::Incremental => "incremental",
            Revisioning::SlidingSnapshot => "sliding-snapshot",
        };
        f.write_str(name)
    }
}

/// Pair of pages a write transaction keeps for one node page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prepared {
    /// Logical view, kept current with the transaction's own writes.
    pub complete: NodePage,
    /// Physical version that will be persisted.
    pub modified: NodePage,
}

impl Revisioning {
    /// Number of physical versions the strategy consults.
    pub fn versions_to_read(self, window: usize) -> usize {
        match self {
            Revisioning::FullDump => 1,
            _ => window.max(1),
        }
    }

    /// Rebuilds the logical page from its physical versions.
    pub fn reconstruct(self, versions: &[NodePage], window: usize) -> Result<NodePage> {
        let window = window.max(1);
        let ordered = ordered(versions, self.versions_to_read(window))?;
        let slots = self.combine(&ordered, window)?;
        let newest = ordered[0];
        let mut page = newest
            .clone()
            .restamp(newest.key(), newest.revision(), newest.previous(), true);
        fill(&mut page, slots)?;
        Ok(page)
    }

    /// Builds the logical view and the physical version that revision
    /// `revision` will write for this page under storage key `key`.
    pub fn prepare_modification(
        self,
        versions: &[NodePage],
        window: usize,
        key: StorageKey,
        revision: Revision,
    ) -> Result<Prepared> {
        let window = window.max(1);
        let ordered = ordered(versions, self.versions_to_read(window))?;
        let newest = ordered[0];
        if revision <= newest.revision() {
            return Err(StratumError::InconsistentHistory(format!(
                "page {} modified at {revision} but already has a version at {}",
                newest.page_key(),
                newest.revision()
            )));
        }
        let complete_slots = self.combine(&ordered, window)?;
        let mut complete = NodePage::delta(key, newest.page_key(), revision, newest.key())
            .restamp(key, revision, Some(newest.key()), true);
        fill(&mut complete, complete_slots)?;

        let delta = NodePage::delta(key, newest.page_key(), revision, newest.key());
        let modified = match self {
            Revisioning::FullDump => compacted(&complete),
            Revisioning::Differential => {
                let base = base_position(&ordered, window)?;
                if base + 1 >= window {
                    compacted(&complete)
                } else {
                    let mut diff = delta;
                    fill(&mut diff, merge(&ordered[..base]))?;
                    diff
                }
            }
            Revisioning::Incremental => {
                let base = base_position(&ordered, window)?;
                if base + 1 >= window {
                    compacted(&complete)
                } else {
                    delta
                }
            }
            Revisioning::SlidingSnapshot => {
                let mut carried = delta;
                if ordered.len() >= window {
                    let leaving = ordered[window - 1];
                    let staying = &ordered[..window - 1];
                    for index in 0..SLOT_COUNT {
                        let slot = leaving.slot(index);
                        if slot.is_set() && staying.iter().all(|v| !v.slot(index).is_set()) {
                            carried.set_slot(index, slot.clone())?;
                        }
                    }
                }
                carried
            }
        };
        Ok(Prepared { complete, modified })
    }

    fn combine(self, ordered: &[&NodePage], window: usize) -> Result<Vec<Slot>> {
        match self {
            Revisioning::FullDump => {
                let newest = ordered[0];
                if !newest.is_full() {
                    return Err(StratumError::InconsistentHistory(format!(
                        "page {} version {} is not complete",
                        newest.page_key(),
                        newest.key()
                    )));
                }
                Ok(newest.slots().to_vec())
            }
            Revisioning::Differential | Revisioning::Incremental => {
                let base = base_position(ordered, window)?;
                Ok(merge(&ordered[..=base]))
            }
            Revisioning::SlidingSnapshot => Ok(merge(ordered)),
        }
    }
}

/// Sorts newest first, truncates to `limit` and validates the lineage.
fn ordered(versions: &[NodePage], limit: usize) -> Result<Vec<&NodePage>> {
    if versions.is_empty() {
        return Err(StratumError::Precondition("no page versions to combine"));
    }
    let mut ordered: Vec<&NodePage> = versions.iter().collect();
    ordered.sort_by(|a, b| b.revision().cmp(&a.revision()));
    let page_key = ordered[0].page_key();
    for pair in ordered.windows(2) {
        if pair[0].revision() == pair[1].revision() {
            return Err(StratumError::InconsistentHistory(format!(
                "page {page_key} has two versions at {}",
                pair[0].revision()
            )));
        }
    }
    if let Some(stranger) = ordered.iter().find(|v| v.page_key() != page_key) {
        return Err(StratumError::CorruptPage(format!(
            "version {} belongs to page {}, expected {page_key}",
            stranger.key(),
            stranger.page_key()
        )));
    }
    ordered.truncate(limit.max(1));
    Ok(ordered)
}

/// Position of the newest complete version inside the window.
fn base_position(ordered: &[&NodePage], window: usize) -> Result<usize> {
    ordered
        .iter()
        .take(window.max(1))
        .position(|v| v.is_full())
        .ok_or_else(|| {
            StratumError::InconsistentHistory(format!(
                "page {} has no complete version within the last {window}",
                ordered[0].page_key()
            ))
        })
}

/// Per slot, the value of the newest version that set it.
fn merge(ordered: &[&NodePage]) -> Vec<Slot> {
    (0..SLOT_COUNT)
        .map(|index| {
            ordered
                .iter()
                .map(|v| v.slot(index))
                .find(|slot| slot.is_set())
                .cloned()
                .unwrap_or_default()
        })
        .collect()
}

fn fill(page: &mut NodePage, slots: Vec<Slot>) -> Result<()> {
    for (index, slot) in slots.into_iter().enumerate() {
        page.set_slot(index, slot)?;
    }
    Ok(())
}

/// Complete copy with tombstones dropped; a complete version shadows everything older.
fn compacted(complete: &NodePage) -> NodePage {
    let mut page = complete.clone();
    for index in 0..SLOT_COUNT {
        if matches!(page.slot(index), Slot::Removed) {
            // Index is in range by construction.
            let _ = page.set_slot(index, Slot::Empty);
        }
    }
    page
}
