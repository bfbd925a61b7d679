//! Body of the writer thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::batch::Batch;
use crate::flow::queue::{WorkItem, WorkQueue};
use crate::flow::report::{ReportBus, WriterEvent};
use crate::observability::metrics::{
    record_batch_failure, record_commit, record_connect_failure, record_queue_depth,
};
use crate::storage::{StoreConnection, StoreFactory};

use super::commit::commit_batch;
use super::{BatchError, Shared, WriterError, WriterState};

/// Wait for a producer that is mid-enqueue while draining after shutdown.
const LATE_ARRIVAL_WAIT: Duration = Duration::from_millis(10);

/// Why the main loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    /// The shutdown item reached the head of the queue.
    Shutdown,
    /// Stop was requested and the queue ran dry without a shutdown item.
    StopRequested,
    /// Interrupt requested; the rest of the queue was discarded.
    Interrupted,
}

pub(super) struct Worker {
    queue: WorkQueue,
    shared: Arc<Shared>,
    reports: ReportBus,
    poll_interval: Duration,
}

impl Worker {
    pub(super) fn new(
        queue: WorkQueue,
        shared: Arc<Shared>,
        reports: ReportBus,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            shared,
            reports,
            poll_interval,
        }
    }

    pub(super) fn run<F: StoreFactory>(self, factory: &F, location: &str) {
        tracing::info!(location, "Writer starting");

        let conn = match connect(factory, location) {
            Ok(conn) => conn,
            Err(error) => {
                tracing::error!(location, error = %error, "Writer failed to start");
                record_connect_failure();
                self.queue.close();
                self.reports.publish(WriterEvent::ConnectFailed {
                    error: Arc::new(error),
                });
                self.shared.set_state(WriterState::ConnectFailed);
                return;
            }
        };

        self.shared.set_state(WriterState::Connected);
        tracing::info!(location, "Writer connected");
        self.reports.publish(WriterEvent::Connected {
            location: location.to_string(),
        });

        // Dropped after `serve` has released the connection, also on unwind.
        let _stopped = StopGuard { worker: &self };
        self.serve(conn);
    }

    fn serve(&self, mut conn: Box<dyn StoreConnection>) {
        self.shared.set_state(WriterState::Running);
        let exit = self.main_loop(conn.as_mut());

        self.shared.set_state(WriterState::Draining);
        tracing::debug!(?exit, "Writer left main loop, releasing connection");
        drop(conn);
    }

    fn main_loop(&self, conn: &mut dyn StoreConnection) -> LoopExit {
        loop {
            let item = self.queue.try_dequeue(self.poll_interval);

            if self.shared.interrupted() {
                self.discard_pending(item);
                return LoopExit::Interrupted;
            }

            match item {
                Some(WorkItem::Data(batch)) => self.process(conn, batch),
                Some(WorkItem::Shutdown) => {
                    tracing::info!("Shutdown received, finishing late arrivals");
                    return self.drain_late_arrivals(conn);
                }
                None => {
                    if self.shared.stop_requested() && self.queue.is_settled() {
                        return LoopExit::StopRequested;
                    }
                }
            }

            record_queue_depth(self.queue.len());
        }
    }

    /// Commit batches that raced the stop request and landed behind the
    /// shutdown item.
    fn drain_late_arrivals(&self, conn: &mut dyn StoreConnection) -> LoopExit {
        let settle_wait = LATE_ARRIVAL_WAIT.min(self.poll_interval);

        while !self.queue.is_settled() {
            let Some(item) = self.queue.try_dequeue(settle_wait) else {
                continue;
            };
            if self.shared.interrupted() {
                self.discard_pending(Some(item));
                return LoopExit::Interrupted;
            }
            if let WorkItem::Data(batch) = item {
                self.process(conn, batch);
            }
        }
        LoopExit::Shutdown
    }

    fn process(&self, conn: &mut dyn StoreConnection, batch: Batch) {
        let start = Instant::now();

        match commit_batch(conn, &batch) {
            Ok(rows) => {
                let latency = start.elapsed();
                self.shared.committed.fetch_add(1, Ordering::SeqCst);
                record_commit(batch.table(), rows, latency.as_secs_f64());

                tracing::debug!(
                    batch_id = %batch.id(),
                    table = batch.table(),
                    rows,
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    "Batch committed"
                );

                let batch_id = batch.id();
                let (table, _) = batch.into_parts();
                self.reports.publish(WriterEvent::Committed {
                    batch_id,
                    table,
                    rows,
                    latency,
                });
            }
            Err(error) => {
                self.shared.failed.fetch_add(1, Ordering::SeqCst);
                self.report_failure(batch, error);
            }
        }
    }

    fn discard(&self, batch: Batch) {
        self.shared.discarded.fetch_add(1, Ordering::SeqCst);
        self.report_failure(batch, BatchError::Interrupted);
    }

    /// Discard the item in hand and everything still queued after an
    /// interrupt. The `Interrupted` report comes first and counts only data.
    fn discard_pending(&self, in_hand: Option<WorkItem>) {
        let batches = self.take_pending(in_hand);
        let pending = batches.len();
        tracing::warn!(pending, "Writer interrupted, discarding queued batches");
        self.reports.publish(WriterEvent::Interrupted { pending });

        for batch in batches {
            self.discard(batch);
        }
    }

    /// Collect queued batches until the closed queue has settled.
    fn take_pending(&self, in_hand: Option<WorkItem>) -> Vec<Batch> {
        let settle_wait = LATE_ARRIVAL_WAIT.min(self.poll_interval);
        let mut batches = Vec::new();
        let mut next = in_hand;

        loop {
            if let Some(WorkItem::Data(batch)) = next {
                batches.push(batch);
            }
            if self.queue.is_settled() {
                return batches;
            }
            next = self.queue.try_dequeue(settle_wait);
        }
    }

    fn report_failure(&self, batch: Batch, error: BatchError) {
        record_batch_failure(batch.table(), error.kind());

        tracing::warn!(
            batch_id = %batch.id(),
            table = batch.table(),
            rows = batch.len(),
            error = %error,
            "Batch failed"
        );

        let batch_id = batch.id();
        let rows = batch.len();
        let (table, _) = batch.into_parts();
        self.reports.publish(WriterEvent::Failed {
            batch_id,
            table,
            rows,
            error: Arc::new(error),
        });
    }
}

fn connect<F: StoreFactory>(
    factory: &F,
    location: &str,
) -> Result<Box<dyn StoreConnection>, WriterError> {
    let conn = factory.connect(location).map_err(WriterError::Connect)?;
    if !conn.supports_bulk_append() {
        return Err(WriterError::BulkAppendUnsupported);
    }
    Ok(conn)
}

/// Reports the final status exactly once, after the connection is gone.
struct StopGuard<'a> {
    worker: &'a Worker,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        let shared = &self.worker.shared;
        let stats = shared.stats();

        if thread::panicking() {
            tracing::error!(
                committed = stats.committed,
                failed = stats.failed,
                "Writer thread panicked, connection released"
            );
        }

        tracing::info!(
            committed = stats.committed,
            failed = stats.failed,
            discarded = stats.discarded,
            "Writer stopped"
        );

        // Publish before flipping the state so `await_stopped` callers find
        // the report already queued.
        self.worker.reports.publish(WriterEvent::Stopped {
            committed: stats.committed,
            failed: stats.failed,
            discarded: stats.discarded,
        });
        shared.set_state(WriterState::Stopped);
    }
}
