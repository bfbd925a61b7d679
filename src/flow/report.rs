//! Report bus for writer outcomes.
//!
//! Uses tokio::sync::broadcast so any number of observers can follow the
//! writer. Sending never blocks the writer thread; a slow observer lags and
//! drops its oldest reports instead.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, Receiver, Sender};
use uuid::Uuid;

use crate::writer::{BatchError, WriterError};

/// Outcome reported by the writer thread.
#[derive(Debug, Clone)]
pub enum WriterEvent {
    /// The store connection is open and the writer is running.
    Connected { location: String },
    /// The writer could not start.
    ConnectFailed { error: Arc<WriterError> },
    /// A batch was committed.
    Committed {
        batch_id: Uuid,
        table: String,
        rows: usize,
        latency: Duration,
    },
    /// A batch was discarded.
    Failed {
        batch_id: Uuid,
        table: String,
        rows: usize,
        error: Arc<BatchError>,
    },
    /// The writer was interrupted and skips the remaining queue.
    Interrupted { pending: usize },
    /// The writer released its connection and exited.
    Stopped {
        committed: u64,
        failed: u64,
        discarded: u64,
    },
}

impl WriterEvent {
    /// Whether this is the last event a writer emits.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WriterEvent::Stopped { .. } | WriterEvent::ConnectFailed { .. }
        )
    }
}

/// Broadcast channel carrying [`WriterEvent`]s.
///
/// Subscribe before spawning the writer to see every event.
#[derive(Clone)]
pub struct ReportBus {
    sender: Sender<WriterEvent>,
}

impl ReportBus {
    /// Create a new report bus with the given capacity.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of buffered reports per observer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future reports.
    pub fn subscribe(&self) -> Receiver<WriterEvent> {
        self.sender.subscribe()
    }

    /// Publish a report.
    ///
    /// Returns the number of observers that received it.
    pub fn publish(&self, event: WriterEvent) -> usize {
        // send() errors when nobody is subscribed, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active observers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ReportBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for ReportBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportBus")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_report_bus_fans_out() {
        let bus = ReportBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let count = bus.publish(WriterEvent::Interrupted { pending: 3 });
        assert_eq!(count, 2);

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                WriterEvent::Interrupted { pending } => assert_eq!(pending, 3),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_publish_without_receivers() {
        let bus = ReportBus::new(16);
        let count = bus.publish(WriterEvent::Stopped {
            committed: 0,
            failed: 0,
            discarded: 0,
        });
        assert_eq!(count, 0);
    }

    #[test]
    fn test_terminal_events() {
        assert!(WriterEvent::Stopped {
            committed: 1,
            failed: 0,
            discarded: 0
        }
        .is_terminal());
        assert!(!WriterEvent::Interrupted { pending: 0 }.is_terminal());
    }
}
