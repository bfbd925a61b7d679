//! Spillway: a background ingestion worker for analytical stores.
//!
//! Producers hand row batches to a work queue; a single dedicated writer
//! thread owns the storage connection and commits every batch in its own
//! bulk-append transaction.
//!
//! # Architecture
//!
//! - **Single writer**: the connection never leaves the writer thread
//! - **FIFO commits**: batches are committed in the order they were enqueued
//! - **Graceful shutdown**: an in-band shutdown item drains the queue first
//! - **Observable**: every commit and failure is logged, counted and broadcast
//!
//! # Modules
//!
//! - [`batch`]: Row batches and cell values
//! - [`config`]: CLI and environment configuration
//! - [`flow`]: Work queue and report bus
//! - [`observability`]: Metrics and tracing setup
//! - [`storage`]: Store connection traits and the SQLite backend
//! - [`writer`]: The writer thread and its control handle

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // writer::WriterHandle is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod batch;
pub mod config;
pub mod flow;
pub mod observability;
pub mod storage;
pub mod writer;

pub use batch::{Batch, Row, Value};
pub use flow::queue::{EnqueueError, QueuePolicy, WorkItem, WorkQueue};
pub use flow::report::{ReportBus, WriterEvent};
pub use storage::{Appender, StorageError, StoreConnection, StoreFactory, TableInfo};
pub use writer::{BatchError, Writer, WriterConfig, WriterError, WriterHandle, WriterState, WriterStats};

use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable) batch ID.
///
/// Batch IDs correlate the commit or failure report of a batch with the
/// producer that enqueued it.
///
/// # Example
///
/// ```
/// let id = spillway::generate_batch_id();
/// assert_eq!(id.get_version_num(), 7);
/// ```
#[must_use]
pub fn generate_batch_id() -> Uuid {
    Uuid::now_v7()
}
