use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::log::{LogKey, LogValue};
use crate::page::Page;
use crate::types::{Result, StorageKey, StratumError};

use super::{flush, CommitContext, CommitMode, CommitRequest, CommitSnapshot, CommitStrategy, CommitTicket};

/// Flushes on a background worker, one commit at a time in dispatch order.
///
/// The worker is spawned lazily and exits when the queue drains. The first
/// failure poisons the strategy: queued commits are failed without being
/// written, and every later `execute` or `wait_idle` reports the failure
/// until [`CommitStrategy::clear_failure`] is called.
pub struct NonBlockingCommit {
    ctx: CommitContext,
    state: Arc<Mutex<WorkerState>>,
    idle: Arc<Condvar>,
}

#[derive(Default)]
struct WorkerState {
    pending: VecDeque<Arc<CommitRequest>>,
    running: Option<Arc<CommitRequest>>,
    worker_running: bool,
    failed: Option<Failure>,
    closed: bool,
}

struct Failure {
    error: StratumError,
    snapshot: Arc<CommitSnapshot>,
}

impl WorkerState {
    fn busy(&self) -> bool {
        self.running.is_some() || !self.pending.is_empty()
    }

    /// In-flight snapshots, newest first. A failed snapshot stays listed
    /// until the failure is cleared.
    fn in_flight(&self) -> impl Iterator<Item = &Arc<CommitSnapshot>> {
        self.pending
            .iter()
            .rev()
            .chain(self.running.iter())
            .map(|request| &request.snapshot)
            .chain(self.failed.iter().map(|failure| &failure.snapshot))
    }
}

impl NonBlockingCommit {
    /// Strategy flushing through `ctx`.
    pub fn new(ctx: CommitContext) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(WorkerState::default())),
            idle: Arc::new(Condvar::new()),
        }
    }

    fn spawn_worker(&self) -> Result<()> {
        let ctx = self.ctx.clone();
        let state = Arc::clone(&self.state);
        let idle = Arc::clone(&self.idle);
        thread::Builder::new()
            .name("stratum-commit".into())
            .spawn(move || Self::worker_loop(ctx, state, idle))?;
        Ok(())
    }

    fn worker_loop(ctx: CommitContext, state: Arc<Mutex<WorkerState>>, idle: Arc<Condvar>) {
        loop {
            let request = {
                let mut guard = state.lock();
                let Some(next) = guard.pending.pop_front() else {
                    guard.worker_running = false;
                    idle.notify_all();
                    debug!("commit.worker_exit");
                    break;
                };
                guard.running = Some(Arc::clone(&next));
                debug!(
                    revision = next.snapshot.revision().0,
                    pending_remaining = guard.pending.len(),
                    "commit.worker_flush"
                );
                next
            };
            let outcome = flush(&ctx, &request.snapshot);
            let mut guard = state.lock();
            guard.running = None;
            match outcome {
                Ok(()) => request.finish(Ok(())),
                Err(err) => {
                    let revision = request.snapshot.revision().0;
                    error!(revision, error = %err, "commit.nonblocking.failed");
                    let err = err.into_commit_failure();
                    request.finish(Err(err.duplicate()));
                    while let Some(queued) = guard.pending.pop_front() {
                        debug!(
                            revision = queued.snapshot.revision().0,
                            "commit.nonblocking.discarded"
                        );
                        queued.finish(Err(err.duplicate()));
                    }
                    guard.failed = Some(Failure {
                        error: err,
                        snapshot: Arc::clone(&request.snapshot),
                    });
                    guard.worker_running = false;
                    idle.notify_all();
                    break;
                }
            }
            idle.notify_all();
        }
    }
}

impl CommitStrategy for NonBlockingCommit {
    fn mode(&self) -> CommitMode {
        CommitMode::NonBlocking
    }

    fn execute(&self, snapshot: Arc<CommitSnapshot>) -> Result<CommitTicket> {
        let request = Arc::new(CommitRequest::new(snapshot));
        let mut state = self.state.lock();
        if state.closed {
            return Err(StratumError::Closed);
        }
        if let Some(failure) = &state.failed {
            return Err(failure.error.duplicate());
        }
        state.pending.push_back(Arc::clone(&request));
        debug!(
            revision = request.snapshot.revision().0,
            pending = state.pending.len(),
            worker_running = state.worker_running,
            "commit.nonblocking.enqueue"
        );
        if !state.worker_running {
            if let Err(err) = self.spawn_worker() {
                state.pending.pop_back();
                return Err(err.into_commit_failure());
            }
            state.worker_running = true;
        }
        Ok(CommitTicket { request })
    }

    fn value_in_progress(&self, key: &LogKey) -> Option<LogValue> {
        let state = self.state.lock();
        let found = state
            .in_flight()
            .find_map(|snapshot| snapshot.value(key).cloned());
        found
    }

    fn page_in_progress(&self, key: StorageKey) -> Option<Page> {
        let state = self.state.lock();
        let found = state.in_flight().find_map(|snapshot| snapshot.page(key));
        found
    }

    fn is_in_progress(&self) -> bool {
        self.state.lock().busy()
    }

    fn wait_idle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.busy() {
            if self.idle.wait_until(&mut state, deadline).timed_out() && state.busy() {
                return Err(StratumError::timed_out("in-flight commits did not finish"));
            }
        }
        match &state.failed {
            Some(failure) => Err(failure.error.duplicate()),
            None => Ok(()),
        }
    }

    fn clear_failure(&self) -> Option<Arc<CommitSnapshot>> {
        self.state.lock().failed.take().map(|failure| failure.snapshot)
    }

    fn close(&self, timeout: Duration) -> Result<()> {
        self.state.lock().closed = true;
        self.wait_idle(timeout)
    }
}
