//! Test utilities for Spillway integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - A slowed-down connection for backpressure and interrupt tests
//! - Report collection helpers

#![allow(dead_code)]

use rusqlite::Connection;
use spillway::storage::{Appender, SqliteConnection, StorageError, StoreConnection, TableInfo};
use spillway::{ReportBus, Writer, WriterConfig, WriterEvent};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

/// Poll interval used by most tests.
pub const TEST_POLL: Duration = Duration::from_millis(50);

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    /// Location string for the writer.
    pub fn location(&self) -> String {
        self.db_path.to_str().expect("invalid path").to_string()
    }

    /// Open a side connection, as the schema owner or a reader would.
    pub fn connect(&self) -> Connection {
        Connection::open(&self.db_path).expect("failed to open test database")
    }

    /// Run DDL before the writer starts.
    pub fn execute(&self, sql: &str) {
        self.connect()
            .execute_batch(sql)
            .expect("failed to run setup SQL");
    }

    /// Count rows in a table.
    pub fn count(&self, table: &str) -> i64 {
        self.connect()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .expect("count failed")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer config with an unbounded queue and a short poll interval.
pub fn test_config() -> WriterConfig {
    WriterConfig {
        poll_interval: TEST_POLL,
        ..WriterConfig::default()
    }
}

/// Spawn a SQLite writer on the fixture, subscribed before start.
pub fn spawn_sqlite(fixture: &TestFixture, config: WriterConfig) -> (Writer, Receiver<WriterEvent>) {
    spillway::observability::tracing::init_test_tracing();
    let reports = ReportBus::new(4096);
    let rx = reports.subscribe();
    let writer = Writer::spawn(
        spillway::storage::SqliteStore::new(),
        fixture.location(),
        config,
        reports,
    )
    .expect("failed to spawn writer");
    (writer, rx)
}

/// Collect every report published so far.
pub fn drain_events(rx: &mut Receiver<WriterEvent>) -> Vec<WriterEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
        }
    }
}

/// Wait for the next report matching `pred`, collecting everything seen.
pub fn wait_for_event<F>(
    rx: &mut Receiver<WriterEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<WriterEvent>
where
    F: FnMut(&WriterEvent) -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        match rx.try_recv() {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) => thread::sleep(Duration::from_millis(5)),
            Err(TryRecvError::Closed) => return None,
        }
    }
    None
}

/// Wait for a condition to become true with timeout.
pub fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

/// A SQLite connection that sleeps before every batch.
pub struct SlowConnection {
    pub inner: SqliteConnection,
    pub delay: Duration,
}

impl StoreConnection for SlowConnection {
    fn supports_bulk_append(&self) -> bool {
        true
    }

    fn describe_table(&self, table: &str) -> Result<TableInfo, StorageError> {
        thread::sleep(self.delay);
        self.inner.describe_table(table)
    }

    fn begin_append<'a>(
        &'a mut self,
        table: &TableInfo,
    ) -> Result<Box<dyn Appender + 'a>, StorageError> {
        self.inner.begin_append(table)
    }
}

/// Spawn a writer over a slow in-memory database with table `t(a, b)`.
pub fn spawn_slow(delay: Duration, config: WriterConfig) -> (Writer, Receiver<WriterEvent>) {
    spillway::observability::tracing::init_test_tracing();
    let reports = ReportBus::new(4096);
    let rx = reports.subscribe();
    let factory = move |location: &str| -> Result<Box<dyn StoreConnection>, StorageError> {
        let inner = SqliteConnection::open(location, Duration::from_secs(1))?;
        inner.inner().execute_batch("CREATE TABLE t (a, b)")?;
        Ok(Box::new(SlowConnection { inner, delay }))
    };
    let writer = Writer::spawn(factory, ":memory:", config, reports).expect("failed to spawn writer");
    (writer, rx)
}

/// Batch IDs of commit reports, in report order.
pub fn committed_ids(events: &[WriterEvent]) -> Vec<uuid::Uuid> {
    events
        .iter()
        .filter_map(|e| match e {
            WriterEvent::Committed { batch_id, .. } => Some(*batch_id),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.location().ends_with("test.db"));
    }
}
