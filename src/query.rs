//! Snapshot query execution.
//!
//! The snapshot read is the only blocking step of a live query, so it runs on
//! a worker thread and reports back over a one-slot channel.

use crate::error::FetchError;
use crate::transport::Transport;
use crate::types::{QuerySpec, Record};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Default name for snapshot worker threads.
pub const DEFAULT_FETCH_WORKER_NAME: &str = "livesync-fetch";

type FetchResult = Result<Vec<Record>, FetchError>;

/// Spawns snapshot reads.
pub struct QueryExecutor;

impl QueryExecutor {
    /// Start the snapshot read for `spec` on a named worker thread.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        spec: QuerySpec,
        generation: u64,
        worker_name: &str,
    ) -> Result<SnapshotFetch, FetchError> {
        let (sender, receiver) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let table = spec.table.clone();

        let worker_cancelled = Arc::clone(&cancelled);
        thread::Builder::new()
            .name(worker_name.to_string())
            .spawn(move || {
                let result = transport.query(&spec);
                if worker_cancelled.load(Ordering::Acquire) {
                    debug!(table = %spec.table, generation, "discarding cancelled snapshot");
                    return;
                }
                // The receiver may already be gone; nothing to report to then.
                let _ = sender.send(result);
            })
            .map_err(|e| FetchError::new(&table, format!("failed to start fetch worker: {}", e)))?;

        debug!(table = %table, generation, "snapshot fetch started");
        Ok(SnapshotFetch {
            table,
            generation,
            receiver,
            cancelled,
        })
    }
}

/// An in-flight snapshot read.
#[derive(Debug)]
pub struct SnapshotFetch {
    table: String,
    generation: u64,
    receiver: Receiver<FetchResult>,
    cancelled: Arc<AtomicBool>,
}

impl SnapshotFetch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Non-blocking check. `None` while the read is still running.
    pub fn poll(&self) -> Option<FetchResult> {
        if self.is_cancelled() {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.worker_gone())),
        }
    }

    /// Block up to `timeout` for the result.
    pub fn wait(&self, timeout: Duration) -> Option<FetchResult> {
        if self.is_cancelled() {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(self.worker_gone())),
        }
    }

    /// Make sure the result is never delivered. The transport call itself
    /// runs to completion on the worker.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn worker_gone(&self) -> FetchError {
        FetchError::new(&self.table, "fetch worker exited without a result")
    }
}

impl Drop for SnapshotFetch {
    fn drop(&mut self) {
        self.cancel();
    }
}
