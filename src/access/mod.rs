#![forbid(unsafe_code)]
//! Session boundary: opening resources and running transactions on them.
//!
//! A [`Session`] owns the backend, the read cache and the commit strategy
//! of one resource. Any number of [`ReadTransaction`]s may be open at once,
//! each pinned to a published revision; at most one [`WriteTransaction`]
//! exists at a time.

pub mod config;
mod read;
mod session;
mod write;

pub use config::{BackendConfig, HandlerConfig, ResourceConfig, CONFIG_FILE};
pub use read::ReadTransaction;
pub use session::Session;
pub use write::WriteTransaction;
