#![forbid(unsafe_code)]
//! Persistent page types and their binary layout.
//!
//! Every page encodes as `[kind u8][storage key u64][body]`, big-endian,
//! with explicit element counts. Decoding checks the kind tag, the counts
//! and that no trailing bytes remain.

mod indirect;
mod meta;
mod node;
mod reference;
mod revision_root;
pub mod trie;
mod uber;

use std::fmt;

pub use indirect::IndirectPage;
pub use meta::MetaPage;
pub use node::{NodePage, Slot};
pub use reference::{PageReference, PageSource};
pub use revision_root::RevisionRootPage;
pub use trie::TrieRoot;
pub use uber::UberPage;

use crate::primitives::bytes::{buf::Cursor, ord};
use crate::types::{Result, StorageKey, StratumError};

/// Discriminant written in front of every page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageKind {
    /// [`UberPage`].
    Uber = 1,
    /// [`RevisionRootPage`].
    RevisionRoot = 2,
    /// [`IndirectPage`].
    Indirect = 3,
    /// [`NodePage`].
    Node = 4,
    /// [`MetaPage`].
    Meta = 5,
}

impl PageKind {
    fn from_u8(raw: u8) -> Result<Self> {
        Ok(match raw {
            1 => PageKind::Uber,
            2 => PageKind::RevisionRoot,
            3 => PageKind::Indirect,
            4 => PageKind::Node,
            5 => PageKind::Meta,
            other => {
                return Err(StratumError::CorruptPage(format!(
                    "unknown page kind {other}"
                )))
            }
        })
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PageKind::Uber => "uber",
            PageKind::RevisionRoot => "revision-root",
            PageKind::Indirect => "indirect",
            PageKind::Node => "node",
            PageKind::Meta => "meta",
        };
        f.write_str(name)
    }
}

/// Any persistent page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Page {
    /// Resource root.
    Uber(UberPage),
    /// Per-revision root.
    RevisionRoot(RevisionRootPage),
    /// Trie interior page.
    Indirect(IndirectPage),
    /// Node record page.
    Node(NodePage),
    /// Per-revision metadata.
    Meta(MetaPage),
}

impl Page {
    /// Storage key this page is filed under.
    pub fn key(&self) -> StorageKey {
        match self {
            Page::Uber(page) => page.key(),
            Page::RevisionRoot(page) => page.key(),
            Page::Indirect(page) => page.key(),
            Page::Node(page) => page.key(),
            Page::Meta(page) => page.key(),
        }
    }

    /// Variant tag.
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Uber(_) => PageKind::Uber,
            Page::RevisionRoot(_) => PageKind::RevisionRoot,
            Page::Indirect(_) => PageKind::Indirect,
            Page::Node(_) => PageKind::Node,
            Page::Meta(_) => PageKind::Meta,
        }
    }

    /// Borrows the page as an indirect page.
    pub fn as_indirect(&self) -> Result<&IndirectPage> {
        match self {
            Page::Indirect(page) => Ok(page),
            other => Err(unexpected(PageKind::Indirect, other)),
        }
    }

    /// Mutably borrows the page as an indirect page.
    pub fn as_indirect_mut(&mut self) -> Result<&mut IndirectPage> {
        match self {
            Page::Indirect(page) => Ok(page),
            other => Err(unexpected(PageKind::Indirect, other)),
        }
    }

    /// Borrows the page as a node page.
    pub fn as_node(&self) -> Result<&NodePage> {
        match self {
            Page::Node(page) => Ok(page),
            other => Err(unexpected(PageKind::Node, other)),
        }
    }

    /// Mutably borrows the page as a node page.
    pub fn as_node_mut(&mut self) -> Result<&mut NodePage> {
        match self {
            Page::Node(page) => Ok(page),
            other => Err(unexpected(PageKind::Node, other)),
        }
    }

    /// Borrows the page as a revision root.
    pub fn as_revision_root(&self) -> Result<&RevisionRootPage> {
        match self {
            Page::RevisionRoot(page) => Ok(page),
            other => Err(unexpected(PageKind::RevisionRoot, other)),
        }
    }

    /// Borrows the page as a metadata page.
    pub fn as_meta(&self) -> Result<&MetaPage> {
        match self {
            Page::Meta(page) => Ok(page),
            other => Err(unexpected(PageKind::Meta, other)),
        }
    }

    /// Borrows the page as an uber page.
    pub fn as_uber(&self) -> Result<&UberPage> {
        match self {
            Page::Uber(page) => Ok(page),
            other => Err(unexpected(PageKind::Uber, other)),
        }
    }

    /// Encodes the page into its binary layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        ord::put_u8(&mut out, self.kind() as u8);
        ord::put_u64(&mut out, self.key().0);
        match self {
            Page::Uber(page) => page.encode_body(&mut out),
            Page::RevisionRoot(page) => page.encode_body(&mut out),
            Page::Indirect(page) => page.encode_body(&mut out),
            Page::Node(page) => page.encode_body(&mut out),
            Page::Meta(page) => page.encode_body(&mut out),
        }
        out
    }

    /// Decodes a page previously produced by [`Page::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let kind = PageKind::from_u8(cur.u8()?)?;
        let key = StorageKey(cur.u64()?);
        let page = match kind {
            PageKind::Uber => Page::Uber(UberPage::decode_body(key, &mut cur)?),
            PageKind::RevisionRoot => {
                Page::RevisionRoot(RevisionRootPage::decode_body(key, &mut cur)?)
            }
            PageKind::Indirect => Page::Indirect(IndirectPage::decode_body(key, &mut cur)?),
            PageKind::Node => Page::Node(NodePage::decode_body(key, &mut cur)?),
            PageKind::Meta => Page::Meta(MetaPage::decode_body(key, &mut cur)?),
        };
        cur.finish()?;
        Ok(page)
    }
}

fn unexpected(expected: PageKind, found: &Page) -> StratumError {
    StratumError::CorruptPage(format!(
        "expected {expected} page at {}, found {}",
        found.key(),
        found.kind()
    ))
}
