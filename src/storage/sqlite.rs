//! SQLite backend for the writer.
//!
//! A bulk-append transaction is an IMMEDIATE transaction plus a cached
//! positional INSERT. Rows are invisible to readers until the transaction
//! commits; dropping the appender rolls it back.

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::{params_from_iter, Connection, OpenFlags, Transaction, TransactionBehavior};
use std::time::Duration;

use super::schema::{apply_pragmas, describe_table, insert_sql};
use super::{Appender, StorageError, StoreConnection, StoreFactory, TableInfo};
use crate::batch::Value;

/// Location string for a private in-memory database.
pub const MEMORY_LOCATION: &str = ":memory:";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(v) => ToSqlOutput::from(*v),
            Value::Real(v) => ToSqlOutput::from(*v),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Blob(v) => ToSqlOutput::from(v.as_slice()),
            Value::Boolean(v) => ToSqlOutput::from(*v),
        })
    }
}

/// Connection factory for SQLite database files.
#[derive(Debug, Clone, Copy)]
pub struct SqliteStore {
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how long a connection waits on a locked database.
    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

impl Default for SqliteStore {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreFactory for SqliteStore {
    fn connect(&self, location: &str) -> Result<Box<dyn StoreConnection>, StorageError> {
        Ok(Box::new(SqliteConnection::open(location, self.busy_timeout)?))
    }
}

/// A writer connection to one SQLite database.
#[derive(Debug)]
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Open (or create) the database at `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the pragmas fail.
    pub fn open(location: &str, busy_timeout: Duration) -> Result<Self, StorageError> {
        let conn = if location == MEMORY_LOCATION {
            Connection::open_in_memory()?
        } else {
            Connection::open_with_flags(
                location,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        };
        apply_pragmas(&conn, busy_timeout)?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection.
    pub fn inner(&self) -> &Connection {
        &self.conn
    }
}

impl StoreConnection for SqliteConnection {
    fn supports_bulk_append(&self) -> bool {
        true
    }

    fn describe_table(&self, table: &str) -> Result<TableInfo, StorageError> {
        describe_table(&self.conn, table)
    }

    fn begin_append<'a>(
        &'a mut self,
        table: &TableInfo,
    ) -> Result<Box<dyn Appender + 'a>, StorageError> {
        let sql = insert_sql(table)?;
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Box::new(SqliteAppender { tx, sql }))
    }
}

struct SqliteAppender<'a> {
    tx: Transaction<'a>,
    sql: String,
}

impl Appender for SqliteAppender<'_> {
    fn append_row(&mut self, row: &[Value]) -> Result<(), StorageError> {
        let mut stmt = self.tx.prepare_cached(&self.sql)?;
        stmt.execute(params_from_iter(row.iter()))?;
        Ok(())
    }

    fn flush(self: Box<Self>) -> Result<(), StorageError> {
        let appender = *self;
        appender.tx.commit()?;
        Ok(())
    }
}
