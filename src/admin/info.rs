use std::path::Path;

use serde::Serialize;

use crate::access::Session;
use crate::commit::CommitMode;
use crate::revisioning::Revisioning;
use crate::types::Result;

/// Summary of a resource and its newest revision.
#[derive(Clone, Debug, Serialize)]
pub struct InfoReport {
    /// Resource directory.
    pub location: String,
    /// Versioning strategy.
    pub revisioning: Revisioning,
    /// Versions a strategy may consult.
    pub window: usize,
    /// Commit execution mode.
    pub commit: CommitMode,
    /// Name of the page store.
    pub store: &'static str,
    /// Byte handlers in write order.
    pub pipeline: Vec<&'static str>,
    /// Published revisions.
    pub revision_count: u64,
    /// Newest published revision.
    pub latest_revision: u64,
    /// Node pages reachable from the newest revision.
    pub node_pages: usize,
    /// Highest node key handed out.
    pub max_node_key: Option<u64>,
    /// Metadata entries in the newest revision.
    pub meta_entries: usize,
}

/// Opens the resource in `dir` and describes it.
pub fn info(dir: impl AsRef<Path>) -> Result<InfoReport> {
    let dir = dir.as_ref();
    let session = Session::open(dir)?;
    let report = {
        let read = session.begin_read()?;
        let config = session.config();
        InfoReport {
            location: dir.display().to_string(),
            revisioning: config.revisioning,
            window: config.window,
            commit: config.commit,
            store: session.backend().store().name(),
            pipeline: session.backend().pipeline().names(),
            revision_count: session.revision_count(),
            latest_revision: read.revision().0,
            node_pages: read.page_keys()?.len(),
            max_node_key: read.max_node_key().map(|key| key.0),
            meta_entries: read.meta_entries().count(),
        }
    };
    session.close()?;
    Ok(report)
}
