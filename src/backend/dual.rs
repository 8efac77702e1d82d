use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::types::{Result, StorageKey, StratumError};

use super::BlobStore;

type Reply = Sender<Result<Option<Vec<u8>>>>;

enum SecondaryOp {
    Put(StorageKey, Vec<u8>),
    PutRoot(Vec<u8>),
    Sync,
    Get(StorageKey, Reply),
    GetRoot(Reply),
    Drain(Sender<()>),
}

/// Mirrors every write to a secondary store in the background.
///
/// The primary is authoritative: its failures fail the caller, while
/// secondary failures are only logged and counted. Reads that the primary
/// cannot answer fall back to the secondary, after any mirrored writes
/// still queued ahead of them.
pub struct DualStore {
    primary: Arc<dyn BlobStore>,
    secondary_name: &'static str,
    queue: Mutex<Option<Sender<SecondaryOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Arc<AtomicU64>,
    timeout: Duration,
}

impl DualStore {
    /// Pairs `primary` with `secondary`; `timeout` bounds fallback reads and close.
    pub fn new(
        primary: Arc<dyn BlobStore>,
        secondary: Arc<dyn BlobStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let failures = Arc::new(AtomicU64::new(0));
        let secondary_name = secondary.name();
        let worker_failures = Arc::clone(&failures);
        let worker = thread::Builder::new()
            .name("stratum-secondary".into())
            .spawn(move || run_secondary(secondary, rx, worker_failures))?;
        Ok(Self {
            primary,
            secondary_name,
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            failures,
            timeout,
        })
    }

    /// Number of mirrored operations the secondary failed.
    pub fn secondary_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn enqueue(&self, op: SecondaryOp) -> Result<()> {
        let queue = self.queue.lock();
        let Some(tx) = queue.as_ref() else {
            return Err(StratumError::Closed);
        };
        if tx.send(op).is_err() {
            warn!(secondary = self.secondary_name, "dual_store.secondary_gone");
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn ask_secondary(&self, op: impl FnOnce(Reply) -> SecondaryOp) -> Result<Option<Vec<u8>>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.enqueue(op(reply_tx))?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(StratumError::timed_out("secondary store did not answer"))
            }
            Err(RecvTimeoutError::Disconnected) => Err(StratumError::Closed),
        }
    }

    fn read_with_fallback(
        &self,
        primary: Result<Option<Vec<u8>>>,
        secondary: impl FnOnce(Reply) -> SecondaryOp,
    ) -> Result<Option<Vec<u8>>> {
        match primary {
            Ok(Some(bytes)) => Ok(Some(bytes)),
            Ok(None) => self.ask_secondary(secondary),
            Err(primary_err) => match self.ask_secondary(secondary) {
                Ok(Some(bytes)) => {
                    warn!(error = %primary_err, "dual_store.primary_read_failed_served_by_secondary");
                    Ok(Some(bytes))
                }
                _ => Err(primary_err),
            },
        }
    }
}

fn run_secondary(store: Arc<dyn BlobStore>, rx: Receiver<SecondaryOp>, failures: Arc<AtomicU64>) {
    let record = |what: &'static str, result: Result<()>| {
        if let Err(err) = result {
            failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, op = what, store = store.name(), "dual_store.secondary_failed");
        }
    };
    for op in rx {
        match op {
            SecondaryOp::Put(key, bytes) => record("put", store.put(key, &bytes)),
            SecondaryOp::PutRoot(bytes) => record("put_root", store.put_root(&bytes)),
            SecondaryOp::Sync => record("sync", store.sync()),
            SecondaryOp::Get(key, reply) => {
                let _ = reply.send(store.get(key));
            }
            SecondaryOp::GetRoot(reply) => {
                let _ = reply.send(store.get_root());
            }
            SecondaryOp::Drain(done) => {
                let _ = done.send(());
            }
        }
    }
    record("close", store.close());
    debug!(store = store.name(), "dual_store.secondary_stopped");
}

impl BlobStore for DualStore {
    fn name(&self) -> &'static str {
        "dual"
    }

    fn get(&self, key: StorageKey) -> Result<Option<Vec<u8>>> {
        let primary = self.primary.get(key);
        self.read_with_fallback(primary, |reply| SecondaryOp::Get(key, reply))
    }

    fn put(&self, key: StorageKey, bytes: &[u8]) -> Result<()> {
        self.primary.put(key, bytes)?;
        self.enqueue(SecondaryOp::Put(key, bytes.to_vec()))
    }

    fn get_root(&self) -> Result<Option<Vec<u8>>> {
        let primary = self.primary.get_root();
        self.read_with_fallback(primary, SecondaryOp::GetRoot)
    }

    fn put_root(&self, bytes: &[u8]) -> Result<()> {
        self.primary.put_root(bytes)?;
        self.enqueue(SecondaryOp::PutRoot(bytes.to_vec()))
    }

    fn sync(&self) -> Result<()> {
        self.primary.sync()?;
        self.enqueue(SecondaryOp::Sync)
    }

    fn close(&self) -> Result<()> {
        let Some(tx) = self.queue.lock().take() else {
            return Ok(());
        };
        let (done_tx, done_rx) = mpsc::channel();
        let drained = tx.send(SecondaryOp::Drain(done_tx)).is_ok()
            && done_rx.recv_timeout(self.timeout).is_ok();
        drop(tx);
        let primary = self.primary.close();
        if !drained {
            warn!(secondary = self.secondary_name, "dual_store.drain_timed_out");
            return Err(StratumError::timed_out("secondary store did not drain"));
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("dual_store.secondary_worker_panicked");
            }
        }
        primary
    }
}

impl Drop for DualStore {
    fn drop(&mut self) {
        self.queue.get_mut().take();
    }
}
