//! Stratum: a versioned page store.
//!
//! Every commit publishes a new immutable revision of a tree of pages.
//! Node pages are versioned by one of several [`Revisioning`] strategies,
//! which trade read amplification against write amplification, and any
//! published revision can be read while the single writer keeps going.
//!
//! The crate is organised bottom-up:
//! - [`types`] and [`primitives`]: identifiers, errors, byte codecs, locks.
//! - [`page`]: the persisted page variants and trie addressing.
//! - [`revisioning`]: reconstruction and preparation of node page versions.
//! - [`log`]: the write transaction's dirty-page log and the read cache.
//! - [`commit`]: snapshots, the flush order and the commit strategies.
//! - [`backend`]: byte pipeline and blob stores.
//! - [`access`]: sessions and transactions; [`admin`]: inspection reports.

#![warn(missing_docs)]

pub mod access;
pub mod admin;
pub mod backend;
pub mod commit;
pub mod log;
pub mod page;
pub mod primitives;
pub mod revisioning;
pub mod types;

pub use access::{
    BackendConfig, HandlerConfig, ReadTransaction, ResourceConfig, Session, WriteTransaction,
};
pub use commit::CommitMode;
pub use revisioning::Revisioning;
pub use types::{NodeKey, PageKey, Result, Revision, StorageKey, StratumError};
