//! Low-level primitives for building the storage engine.
//!
//! Includes byte encoding, positioned file I/O, and the concurrency
//! controls shared by transactions and commit workers.

/// Byte-level encoding and decoding.
pub mod bytes;

/// Single-writer coordination and ordered publication.
pub mod concurrency;

/// Positioned file I/O.
pub mod io;
