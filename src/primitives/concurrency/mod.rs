#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::types::{Result, Revision, StratumError};

/// Single-writer, multiple-reader coordinator for one resource.
///
/// Writers are exclusive and never queue: a second writer is refused so the
/// caller sees the conflict instead of deadlocking on its own session.
#[derive(Clone, Default)]
pub struct SingleWriter {
    inner: Arc<Mutex<LockState>>,
}

#[derive(Default, Debug)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of open read transactions.
    pub readers: u32,
    /// Whether the write transaction is open.
    pub writer: bool,
}

/// Guard representing an open read transaction.
pub struct ReaderGuard {
    inner: Arc<Mutex<LockState>>,
}

/// Guard representing the open write transaction.
pub struct WriterGuard {
    inner: Arc<Mutex<LockState>>,
}

impl SingleWriter {
    /// Creates an unlocked coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a reader. Readers never wait for the writer.
    pub fn acquire_reader(&self) -> ReaderGuard {
        let mut state = self.inner.lock();
        state.readers = state.readers.saturating_add(1);
        ReaderGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Acquires the writer slot, failing if a write transaction is already open.
    pub fn acquire_writer(&self) -> Result<WriterGuard> {
        let mut state = self.inner.lock();
        if state.writer {
            return Err(StratumError::Invalid("write transaction already open"));
        }
        state.writer = true;
        Ok(WriterGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Returns a snapshot of the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.inner.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.readers = state.readers.saturating_sub(1);
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.inner.lock().writer = false;
    }
}

/// Orders root publication by revision number.
///
/// Exactly one commit may publish at a time, and revision `r` may only
/// publish after `r - 1` has.
pub struct PublishGate {
    next: Mutex<u64>,
    turn: Condvar,
}

impl PublishGate {
    /// Creates a gate expecting `next` to be the next revision published.
    pub fn new(next: Revision) -> Self {
        Self {
            next: Mutex::new(next.0),
            turn: Condvar::new(),
        }
    }

    /// Next revision allowed to publish.
    pub fn next_revision(&self) -> Revision {
        Revision(*self.next.lock())
    }

    /// Blocks until `revision` is next in line, then runs `publish` while
    /// holding the gate. The gate advances only if `publish` succeeds.
    pub fn publish<T>(
        &self,
        revision: Revision,
        timeout: Duration,
        publish: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let deadline = Instant::now() + timeout;
        let mut next = self.next.lock();
        loop {
            if *next == revision.0 {
                break;
            }
            if *next > revision.0 {
                return Err(StratumError::Precondition("revision already published"));
            }
            debug!(
                waiting = revision.0,
                next = *next,
                "publish_gate.wait"
            );
            if self.turn.wait_until(&mut next, deadline).timed_out() && *next != revision.0 {
                return Err(StratumError::timed_out("timed out waiting for publication turn"));
            }
        }
        let value = publish()?;
        *next = revision.0 + 1;
        self.turn.notify_all();
        Ok(value)
    }
}
