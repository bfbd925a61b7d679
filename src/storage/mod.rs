//! Storage layer for Spillway.
//!
//! Provides:
//! - Connection factory and connection traits the writer writes through
//! - Bulk-append transactions scoped to one table
//! - A SQLite backend

pub mod schema;
pub mod sqlite;

pub use sqlite::{SqliteConnection, SqliteStore};

use thiserror::Error;

use crate::batch::Value;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("Bulk append is not supported by this connection")]
    Unsupported,
}

/// Description of a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableInfo {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// An open bulk-append transaction scoped to one table.
///
/// Rows become visible only after [`Appender::flush`]. Dropping an appender
/// without flushing aborts the transaction.
pub trait Appender {
    /// Append one row, values in column order.
    fn append_row(&mut self, row: &[Value]) -> Result<(), StorageError>;

    /// Commit every appended row at once.
    fn flush(self: Box<Self>) -> Result<(), StorageError>;
}

/// A connection handle owned by the writer thread.
pub trait StoreConnection {
    /// Whether this connection can open bulk-append transactions.
    fn supports_bulk_append(&self) -> bool;

    /// Look up a destination table. Fails if it does not exist.
    fn describe_table(&self, table: &str) -> Result<TableInfo, StorageError>;

    /// Open a bulk-append transaction for `table`.
    fn begin_append<'a>(
        &'a mut self,
        table: &TableInfo,
    ) -> Result<Box<dyn Appender + 'a>, StorageError>;
}

/// Opens store connections from a location string.
///
/// The factory is moved onto the writer thread; the connection it returns
/// never leaves that thread.
pub trait StoreFactory: Send + 'static {
    fn connect(&self, location: &str) -> Result<Box<dyn StoreConnection>, StorageError>;
}

impl<F> StoreFactory for F
where
    F: Fn(&str) -> Result<Box<dyn StoreConnection>, StorageError> + Send + 'static,
{
    fn connect(&self, location: &str) -> Result<Box<dyn StoreConnection>, StorageError> {
        self(location)
    }
}
