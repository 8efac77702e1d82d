#![forbid(unsafe_code)]

//! Resource inspection utilities.
//!
//! Reports are plain serializable structs so the inspection CLI can print
//! them as text or JSON.

mod dump;
mod info;
mod verify;

/// Description of an existing resource.
pub use info::{info, InfoReport};

/// Slot listing of one logical node page.
pub use dump::{dump, DumpReport, DumpSlot};

/// Reconstruction of every reachable page.
pub use verify::{verify, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport, VerifySeverity};
