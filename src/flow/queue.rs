//! Work queue between producers and the writer thread.
//!
//! Backed by a crossbeam channel so the writer can wait with a timeout on a
//! plain OS thread. Any number of producers may hold clones of the queue;
//! exactly one writer consumes it.
//!
//! Capacity policy:
//! - `Unbounded`: `enqueue` never blocks
//! - `Bounded`: `enqueue` blocks up to `enqueue_timeout`, then hands the
//!   batch back in [`EnqueueError::Full`]

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::batch::Batch;

/// An item travelling through the queue.
///
/// Shutdown is its own variant so it can never be mistaken for data.
#[derive(Debug)]
pub enum WorkItem {
    Data(Batch),
    Shutdown,
}

/// Capacity policy of a [`WorkQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueuePolicy {
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        enqueue_timeout: Duration,
    },
}

impl QueuePolicy {
    /// Build a policy from config values. A capacity of 0 means unbounded.
    pub fn from_config(capacity: usize, enqueue_timeout_ms: u64) -> Self {
        if capacity == 0 {
            QueuePolicy::Unbounded
        } else {
            QueuePolicy::Bounded {
                capacity,
                enqueue_timeout: Duration::from_millis(enqueue_timeout_ms),
            }
        }
    }
}

/// Error returned when a batch cannot be enqueued. The batch is handed back.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("work queue is closed, writer is shutting down")]
    Closed(Batch),

    #[error("work queue is full")]
    Full(Batch),
}

impl EnqueueError {
    /// Recover the batch that was not enqueued.
    pub fn into_batch(self) -> Batch {
        match self {
            EnqueueError::Closed(batch) | EnqueueError::Full(batch) => batch,
        }
    }
}

/// Thread-safe FIFO of work items.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: Sender<WorkItem>,
    rx: Receiver<WorkItem>,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    policy: QueuePolicy,
}

impl WorkQueue {
    /// Create a new, open queue with the given capacity policy.
    pub fn new(policy: QueuePolicy) -> Self {
        let (tx, rx) = match policy {
            QueuePolicy::Unbounded => unbounded(),
            // A zero-capacity crossbeam channel is a rendezvous channel.
            QueuePolicy::Bounded { capacity, .. } => bounded(capacity.max(1)),
        };
        Self {
            tx,
            rx,
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            policy,
        }
    }

    /// Insert a batch at the tail.
    ///
    /// Fails with `Closed` once a stop has been requested, and with `Full`
    /// if a bounded queue stays full for the whole enqueue timeout.
    pub fn enqueue(&self, batch: Batch) -> Result<(), EnqueueError> {
        // Registered before the accepting check so the writer cannot settle
        // between our check and our send.
        let _in_flight = InFlight::enter(&self.in_flight);
        if !self.is_accepting() {
            return Err(EnqueueError::Closed(batch));
        }

        match self.policy {
            QueuePolicy::Unbounded => self
                .tx
                .send(WorkItem::Data(batch))
                .map_err(|e| EnqueueError::Closed(unwrap_data(e.into_inner()))),
            QueuePolicy::Bounded {
                enqueue_timeout, ..
            } => self
                .tx
                .send_timeout(WorkItem::Data(batch), enqueue_timeout)
                .map_err(|e| match e {
                    SendTimeoutError::Timeout(item) => EnqueueError::Full(unwrap_data(item)),
                    SendTimeoutError::Disconnected(item) => {
                        EnqueueError::Closed(unwrap_data(item))
                    }
                }),
        }
    }

    /// Remove and return the head if one arrives within `timeout`.
    ///
    /// `None` means nothing arrived; it is not an error.
    pub fn try_dequeue(&self, timeout: Duration) -> Option<WorkItem> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Remove and return the head without waiting.
    pub fn try_pop(&self) -> Option<WorkItem> {
        self.rx.try_recv().ok()
    }

    /// Best-effort emptiness check. Races with concurrent producers.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Best-effort number of queued items.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True once the queue is empty and no producer is mid-enqueue.
    ///
    /// Only meaningful after [`close`](Self::close): from then on nothing
    /// new can arrive once this returns true.
    pub fn is_settled(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0 && self.rx.is_empty()
    }

    /// Whether producers may still enqueue.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop accepting producer input.
    ///
    /// Returns true only for the call that actually closed the queue.
    pub(crate) fn close(&self) -> bool {
        self.accepting.swap(false, Ordering::SeqCst)
    }

    /// Place the shutdown item at the tail without blocking.
    ///
    /// Returns false if a bounded queue is full; the writer then notices the
    /// closed queue once it has drained.
    pub(crate) fn push_shutdown(&self) -> bool {
        match self.tx.try_send(WorkItem::Shutdown) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(QueuePolicy::default())
    }
}

/// Counts a producer as mid-enqueue until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn unwrap_data(item: WorkItem) -> Batch {
    match item {
        WorkItem::Data(batch) => batch,
        WorkItem::Shutdown => unreachable!("enqueue only sends data items"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;
    use std::thread;
    use std::time::Instant;

    fn batch(n: i64) -> Batch {
        Batch::new("t", vec![vec![Value::Integer(n)]])
    }

    fn data(item: Option<WorkItem>) -> Batch {
        match item {
            Some(WorkItem::Data(batch)) => batch,
            other => panic!("expected data item, got {other:?}"),
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::default();
        let batches: Vec<_> = (0..5).map(batch).collect();
        for b in &batches {
            queue.enqueue(b.clone()).unwrap();
        }

        for expected in &batches {
            let got = data(queue.try_dequeue(Duration::from_millis(10)));
            assert_eq!(got.id(), expected.id());
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_try_dequeue_times_out_when_empty() {
        let queue = WorkQueue::default();
        let start = Instant::now();
        assert!(queue.try_dequeue(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_closed_queue_hands_batch_back() {
        let queue = WorkQueue::default();
        assert!(queue.close());
        assert!(!queue.close(), "second close must report already closed");

        let b = batch(1);
        let id = b.id();
        let err = queue.enqueue(b).unwrap_err();
        assert!(matches!(err, EnqueueError::Closed(_)));
        assert_eq!(err.into_batch().id(), id);
    }

    #[test]
    fn test_bounded_queue_full_after_timeout() {
        let queue = WorkQueue::new(QueuePolicy::from_config(1, 20));
        queue.enqueue(batch(1)).unwrap();

        let start = Instant::now();
        let err = queue.enqueue(batch(2)).unwrap_err();
        assert!(matches!(err, EnqueueError::Full(_)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_bounded_enqueue_waits_for_space() {
        let queue = WorkQueue::new(QueuePolicy::from_config(1, 2_000));
        queue.enqueue(batch(1)).unwrap();

        let consumer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            data(consumer.try_dequeue(Duration::from_millis(10)))
        });

        // Blocks until the consumer frees the slot.
        queue.enqueue(batch(2)).unwrap();
        handle.join().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_shutdown_item_not_forced_into_full_queue() {
        let queue = WorkQueue::new(QueuePolicy::from_config(1, 10));
        queue.enqueue(batch(1)).unwrap();
        assert!(!queue.push_shutdown());

        data(queue.try_pop());
        assert!(queue.push_shutdown());
        assert!(matches!(queue.try_pop(), Some(WorkItem::Shutdown)));
    }

    #[test]
    fn test_settled_after_close_and_drain() {
        let queue = WorkQueue::default();
        queue.enqueue(batch(1)).unwrap();
        queue.close();
        assert!(!queue.is_settled());

        data(queue.try_pop());
        assert!(queue.is_settled());
    }

    #[test]
    fn test_zero_capacity_means_unbounded() {
        assert_eq!(QueuePolicy::from_config(0, 100), QueuePolicy::Unbounded);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = WorkQueue::default();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = queue.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        q.enqueue(batch(i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.len(), 400);
    }
}
