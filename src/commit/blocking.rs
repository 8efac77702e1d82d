use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::log::{LogKey, LogValue};
use crate::page::Page;
use crate::types::{Result, StorageKey, StratumError};

use super::{flush, CommitContext, CommitMode, CommitRequest, CommitSnapshot, CommitStrategy, CommitTicket};

/// Flushes on the committing thread.
pub struct BlockingCommit {
    ctx: CommitContext,
    current: Mutex<Option<Arc<CommitSnapshot>>>,
    closed: Mutex<bool>,
}

impl BlockingCommit {
    /// Strategy flushing through `ctx`.
    pub fn new(ctx: CommitContext) -> Self {
        Self {
            ctx,
            current: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }
}

impl CommitStrategy for BlockingCommit {
    fn mode(&self) -> CommitMode {
        CommitMode::Blocking
    }

    fn execute(&self, snapshot: Arc<CommitSnapshot>) -> Result<CommitTicket> {
        if *self.closed.lock() {
            return Err(StratumError::Closed);
        }
        *self.current.lock() = Some(Arc::clone(&snapshot));
        let outcome = flush(&self.ctx, &snapshot);
        *self.current.lock() = None;
        let request = Arc::new(CommitRequest::new(snapshot));
        match outcome {
            Ok(()) => {
                request.finish(Ok(()));
                Ok(CommitTicket { request })
            }
            Err(err) => {
                warn!(revision = request.snapshot.revision().0, error = %err, "commit.blocking.failed");
                Err(err.into_commit_failure())
            }
        }
    }

    fn value_in_progress(&self, key: &LogKey) -> Option<LogValue> {
        let current = self.current.lock();
        current.as_ref()?.value(key).cloned()
    }

    fn page_in_progress(&self, key: StorageKey) -> Option<Page> {
        let current = self.current.lock();
        current.as_ref()?.page(key)
    }

    fn is_in_progress(&self) -> bool {
        self.current.lock().is_some()
    }

    fn wait_idle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    fn clear_failure(&self) -> Option<Arc<CommitSnapshot>> {
        None
    }

    fn close(&self, _timeout: Duration) -> Result<()> {
        *self.closed.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use crate::commit::test_support::{context, snapshot_after};
    use crate::page::UberPage;
    use crate::types::Revision;

    #[test]
    fn execute_returns_after_publication() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let strategy = BlockingCommit::new(ctx.clone());
        let ticket = strategy
            .execute(snapshot_after(&UberPage::empty()))
            .unwrap();
        assert!(ticket.is_done());
        assert_eq!(ticket.revision(), Revision(0));
        assert!(!strategy.is_in_progress());
        assert_eq!(ctx.published.read().revision_count(), 1);
    }

    #[test]
    fn failure_surfaces_as_commit_failure() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(Arc::clone(&store));
        let strategy = BlockingCommit::new(ctx.clone());
        crate::backend::BlobStore::close(store.as_ref()).unwrap();
        let err = strategy
            .execute(snapshot_after(&UberPage::empty()))
            .unwrap_err();
        assert!(matches!(err, StratumError::CommitFailure(_)));
        assert_eq!(ctx.published.read().revision_count(), 0);
    }
}
