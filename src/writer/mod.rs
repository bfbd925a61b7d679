//! Dedicated writer thread.
//!
//! One OS thread owns the store connection for its whole lifetime. It pulls
//! work items off the [`WorkQueue`] and commits each batch in its own
//! bulk-append transaction, so commit order always matches enqueue order.
//!
//! Lifecycle:
//!
//! ```text
//! Starting -> Connected -> Running -> Draining -> Stopped
//!     \
//!      -> ConnectFailed
//! ```

mod commit;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::Receiver;

use crate::batch::Batch;
use crate::flow::queue::{EnqueueError, QueuePolicy, WorkQueue};
use crate::flow::report::{ReportBus, WriterEvent};
use crate::storage::{StorageError, StoreFactory};
use worker::Worker;

/// Default wait in `try_dequeue` before the writer re-checks its flags.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fatal writer errors.
#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Failed to connect to store: {0}")]
    Connect(#[source] StorageError),

    #[error("Store connection does not support bulk append")]
    BulkAppendUnsupported,

    #[error("Failed to spawn writer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Writer thread panicked")]
    ThreadPanic,
}

/// Errors that discard a single batch. The writer keeps running.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Destination table check failed: {0}")]
    Table(#[source] StorageError),

    #[error("Row {row} has {found} columns, table expects {expected}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Failed to open bulk append: {0}")]
    Begin(#[source] StorageError),

    #[error("Failed to append row {row}: {source}")]
    Append {
        row: usize,
        #[source]
        source: StorageError,
    },

    #[error("Failed to commit batch: {0}")]
    Commit(#[source] StorageError),

    #[error("Writer was interrupted before the batch was committed")]
    Interrupted,
}

impl BatchError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BatchError::Table(_) => "table",
            BatchError::ColumnCount { .. } => "column_count",
            BatchError::Begin(_) => "begin",
            BatchError::Append { .. } => "append",
            BatchError::Commit(_) => "commit",
            BatchError::Interrupted => "interrupted",
        }
    }
}

/// Lifecycle state of a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Starting,
    Connected,
    Running,
    Draining,
    Stopped,
    ConnectFailed,
}

impl WriterState {
    /// Whether the writer thread has finished.
    pub fn is_terminal(self) -> bool {
        matches!(self, WriterState::Stopped | WriterState::ConnectFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WriterState::Starting => "starting",
            WriterState::Connected => "connected",
            WriterState::Running => "running",
            WriterState::Draining => "draining",
            WriterState::Stopped => "stopped",
            WriterState::ConnectFailed => "connect_failed",
        }
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a writer.
#[derive(Debug, Clone, Copy)]
pub struct WriterConfig {
    /// Capacity policy of the work queue
    pub queue: QueuePolicy,
    /// How long the writer waits for work before re-checking its flags
    pub poll_interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            queue: QueuePolicy::Unbounded,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WriterConfig {
    /// Create a WriterConfig from application config values.
    pub fn from_config(queue_capacity: usize, enqueue_timeout_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            queue: QueuePolicy::from_config(queue_capacity, enqueue_timeout_ms),
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }
}

/// Batch outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub committed: u64,
    pub failed: u64,
    pub discarded: u64,
}

/// State shared between the writer thread and its handles.
#[derive(Debug)]
struct Shared {
    state: Mutex<WriterState>,
    changed: Condvar,
    stop_requested: AtomicBool,
    interrupted: AtomicBool,
    committed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(WriterState::Starting),
            changed: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            committed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    // The state is a plain enum, so a poisoned lock still holds a valid value.
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> WriterState {
        *self.lock()
    }

    fn set_state(&self, next: WriterState) {
        let mut state = self.lock();
        let prev = *state;
        tracing::debug!(from = %prev, to = %next, "Writer state change");
        *state = next;
        self.changed.notify_all();
    }

    fn wait_terminal(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |state| !state.is_terminal())
            .unwrap_or_else(PoisonError::into_inner);
        state.is_terminal()
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn stats(&self) -> WriterStats {
        WriterStats {
            committed: self.committed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Handle for producers and supervisors of a running writer.
///
/// Cheap to clone; every clone talks to the same writer.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    queue: WorkQueue,
    shared: Arc<Shared>,
    reports: ReportBus,
}

impl WriterHandle {
    /// Enqueue a batch for commit.
    ///
    /// Fails once a stop has been requested, or when a bounded queue stays
    /// full for the whole enqueue timeout. The batch is handed back in the
    /// error.
    pub fn enqueue(&self, batch: Batch) -> Result<(), EnqueueError> {
        self.queue.enqueue(batch).inspect_err(|e| {
            let batch = match e {
                EnqueueError::Closed(b) | EnqueueError::Full(b) => b,
            };
            tracing::debug!(
                batch_id = %batch.id(),
                table = batch.table(),
                error = %e,
                "Batch rejected by work queue"
            );
        })
    }

    /// Ask the writer to finish the queued work and stop.
    ///
    /// Returns immediately. Only the first call closes the queue and places
    /// the shutdown item; later calls are no-ops.
    pub fn request_stop(&self) {
        // Close first: the writer trusts the stop flag only once producers
        // are refused.
        let first = self.queue.close();
        self.shared.stop_requested.store(true, Ordering::SeqCst);

        if !first {
            tracing::debug!("Stop already requested");
            return;
        }

        if self.queue.push_shutdown() {
            tracing::info!(pending = self.queue.len(), "Stop requested, shutdown queued");
        } else {
            tracing::warn!(
                pending = self.queue.len(),
                "Stop requested while the queue is full, writer stops once drained"
            );
        }
    }

    /// Ask the writer to stop without draining.
    ///
    /// An in-flight batch still completes; batches left in the queue are
    /// discarded and reported as failed.
    pub fn interrupt(&self) {
        self.shared.interrupted.store(true, Ordering::SeqCst);
        tracing::warn!("Writer interrupt requested");
        self.request_stop();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WriterState {
        self.shared.state()
    }

    /// Block until the writer reaches a terminal state.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn await_stopped(&self, timeout: Duration) -> bool {
        self.shared.wait_terminal(timeout)
    }

    /// Subscribe to writer reports.
    pub fn subscribe(&self) -> Receiver<WriterEvent> {
        self.reports.subscribe()
    }

    /// Best-effort number of queued items.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Batch outcome counters so far.
    pub fn stats(&self) -> WriterStats {
        self.shared.stats()
    }
}

/// A spawned writer thread.
///
/// Dropping a `Writer` that was not joined requests a graceful stop; the
/// thread drains the queue and releases its connection on its own.
#[derive(Debug)]
pub struct Writer {
    handle: WriterHandle,
    thread: Option<JoinHandle<()>>,
}

impl Writer {
    /// Spawn the writer thread.
    ///
    /// The connection is opened on the new thread. Subscribe to `reports`
    /// before calling this to observe every event, including a failed
    /// connect.
    ///
    /// # Arguments
    ///
    /// * `factory` - Opens the store connection
    /// * `location` - Location string passed to the factory
    /// * `config` - Queue policy and poll interval
    /// * `reports` - Bus receiving commit, failure and lifecycle reports
    pub fn spawn<F: StoreFactory>(
        factory: F,
        location: impl Into<String>,
        config: WriterConfig,
        reports: ReportBus,
    ) -> Result<Self, WriterError> {
        let location = location.into();
        let queue = WorkQueue::new(config.queue);
        let shared = Arc::new(Shared::new());

        let worker = Worker::new(
            queue.clone(),
            Arc::clone(&shared),
            reports.clone(),
            config.poll_interval,
        );

        let thread = thread::Builder::new()
            .name("spillway-writer".into())
            .spawn(move || worker.run(&factory, &location))
            .map_err(WriterError::Spawn)?;

        Ok(Self {
            handle: WriterHandle {
                queue,
                shared,
                reports,
            },
            thread: Some(thread),
        })
    }

    /// Get a handle for producers and supervisors.
    pub fn handle(&self) -> WriterHandle {
        self.handle.clone()
    }

    /// Wait for the writer thread to exit.
    pub fn join(mut self) -> Result<WriterState, WriterError> {
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| WriterError::ThreadPanic)?;
        }
        Ok(self.handle.state())
    }

    /// Request a graceful stop and wait for the thread to exit.
    pub fn stop(self) -> Result<WriterState, WriterError> {
        self.handle.request_stop();
        self.join()
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::debug!("Writer dropped without join, requesting stop");
            self.handle.request_stop();
        }
    }
}
