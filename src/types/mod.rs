#![forbid(unsafe_code)]
//! Identifiers, the error taxonomy, and the crate-wide `Result` alias.

use std::fmt;
use std::io;

pub mod checksum;

pub use checksum::{frame_crc32, Checksum, Crc32Fast};

/// Number of node records held by one node page, as a power of two.
pub const SLOT_COUNT_EXP: u32 = 7;
/// Number of node records held by one node page.
pub const SLOT_COUNT: usize = 1 << SLOT_COUNT_EXP;
/// Fan-out of an indirect page, as a power of two.
pub const FANOUT_EXP: u32 = 7;
/// Fan-out of an indirect page.
pub const FANOUT: usize = 1 << FANOUT_EXP;

/// Key of a single node record, assigned by the write transaction.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NodeKey(pub u64);

/// Logical position of a node page, stable across revisions.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageKey(pub u64);

/// Revision number; revision 0 is the bootstrap revision.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Revision(pub u64);

/// Location of one persisted page inside a backend.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StorageKey(pub u64);

impl NodeKey {
    /// Page holding this record.
    pub fn page_key(self) -> PageKey {
        PageKey(self.0 >> SLOT_COUNT_EXP)
    }

    /// Slot of this record inside its page.
    pub fn slot(self) -> usize {
        (self.0 & (SLOT_COUNT as u64 - 1)) as usize
    }
}

impl Revision {
    /// The revision following this one.
    pub fn next(self) -> Revision {
        Revision(self.0 + 1)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors surfaced by the storage engine.
#[derive(thiserror::Error, Debug)]
pub enum StratumError {
    /// Transport or storage failure.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// Corrupt or truncated input to the byte-handler pipeline.
    #[error("byte handling: {0}")]
    ByteHandling(String),
    /// A persisted page failed its structural checks.
    #[error("corrupt page: {0}")]
    CorruptPage(String),
    /// The version history of a page cannot be reconstructed.
    #[error("inconsistent history: {0}")]
    InconsistentHistory(String),
    /// Programming error on the caller's side.
    #[error("precondition violated: {0}")]
    Precondition(&'static str),
    /// Any failure encountered while flushing a commit.
    #[error("commit failed: {0}")]
    CommitFailure(#[source] Box<StratumError>),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid or mismatching resource configuration.
    #[error("configuration: {0}")]
    Config(String),
    /// The transaction, session or worker was already closed.
    #[error("closed")]
    Closed,
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StratumError>;

impl StratumError {
    /// Wraps an error as a commit failure, leaving existing commit failures as they are.
    pub fn into_commit_failure(self) -> StratumError {
        match self {
            StratumError::CommitFailure(_) => self,
            other => StratumError::CommitFailure(Box::new(other)),
        }
    }

    /// Structural copy, used to hand one failure to several waiters.
    pub fn duplicate(&self) -> StratumError {
        match self {
            StratumError::Io(err) => StratumError::Io(io::Error::new(err.kind(), err.to_string())),
            StratumError::ByteHandling(msg) => StratumError::ByteHandling(msg.clone()),
            StratumError::CorruptPage(msg) => StratumError::CorruptPage(msg.clone()),
            StratumError::InconsistentHistory(msg) => StratumError::InconsistentHistory(msg.clone()),
            StratumError::Precondition(msg) => StratumError::Precondition(msg),
            StratumError::CommitFailure(inner) => {
                StratumError::CommitFailure(Box::new(inner.duplicate()))
            }
            StratumError::Invalid(msg) => StratumError::Invalid(msg),
            StratumError::Config(msg) => StratumError::Config(msg.clone()),
            StratumError::Closed => StratumError::Closed,
        }
    }

    pub(crate) fn timed_out(what: &'static str) -> StratumError {
        StratumError::Io(io::Error::new(io::ErrorKind::TimedOut, what))
    }
}
