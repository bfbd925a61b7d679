//! SQLite connection setup and table introspection.
//!
//! Table creation is left to the caller; the writer only checks that a
//! destination exists and how many columns it has.

use rusqlite::Connection;
use std::time::Duration;

use super::{StorageError, TableInfo};

/// Prefix SQLite reserves for its internal tables.
const RESERVED_PREFIX: &str = "sqlite_";

/// Apply writer pragmas to a freshly opened connection.
///
/// - WAL journal so readers are not blocked by the writer
/// - `synchronous=NORMAL`, durable at checkpoint in WAL mode
/// - busy timeout for lock contention with other processes
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::trace!(journal_mode = %mode, "Journal mode applied");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

/// Quote a table name for use in SQL.
///
/// Rejects empty names, names with NUL bytes and SQLite's reserved prefix.
pub fn quote_identifier(name: &str) -> Result<String, StorageError> {
    if name.is_empty()
        || name.contains('\0')
        || name.to_ascii_lowercase().starts_with(RESERVED_PREFIX)
    {
        return Err(StorageError::InvalidTableName(name.to_string()));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Describe `table`, returning its columns in declaration order.
pub fn describe_table(conn: &Connection, table: &str) -> Result<TableInfo, StorageError> {
    let quoted = quote_identifier(table)?;
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({quoted})"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(StorageError::TableNotFound(table.to_string()));
    }

    Ok(TableInfo {
        name: table.to_string(),
        columns,
    })
}

/// Positional INSERT statement for a table.
pub fn insert_sql(table: &TableInfo) -> Result<String, StorageError> {
    let quoted = quote_identifier(&table.name)?;
    let placeholders = vec!["?"; table.column_count()].join(", ");
    Ok(format!("INSERT INTO {quoted} VALUES ({placeholders})"))
}
