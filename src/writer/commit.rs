//! Per-batch bulk-append commit.

use crate::batch::Batch;
use crate::storage::StoreConnection;

use super::BatchError;

/// Commit one batch in a single bulk-append transaction.
///
/// Row widths are checked against the table before the transaction opens.
/// On any later failure the appender is dropped, which aborts the
/// transaction. Returns the number of rows committed.
pub(super) fn commit_batch(
    conn: &mut dyn StoreConnection,
    batch: &Batch,
) -> Result<usize, BatchError> {
    if batch.is_empty() {
        return Ok(0);
    }

    let table = conn
        .describe_table(batch.table())
        .map_err(BatchError::Table)?;

    let expected = table.column_count();
    if let Some((row, found)) = batch
        .rows()
        .iter()
        .map(Vec::len)
        .enumerate()
        .find(|&(_, width)| width != expected)
    {
        return Err(BatchError::ColumnCount {
            row,
            expected,
            found,
        });
    }

    let mut appender = conn.begin_append(&table).map_err(BatchError::Begin)?;
    for (row, values) in batch.rows().iter().enumerate() {
        appender
            .append_row(values)
            .map_err(|source| BatchError::Append { row, source })?;
    }
    appender.flush().map_err(BatchError::Commit)?;

    Ok(batch.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Value;
    use crate::storage::{Appender, StorageError, TableInfo};

    /// In-memory connection that records committed rows.
    #[derive(Default)]
    struct RecordingConnection {
        committed: Vec<Vec<Value>>,
        fail_append_at: Option<usize>,
        fail_commit: bool,
    }

    struct RecordingAppender<'a> {
        conn: &'a mut RecordingConnection,
        pending: Vec<Vec<Value>>,
    }

    impl Appender for RecordingAppender<'_> {
        fn append_row(&mut self, row: &[Value]) -> Result<(), StorageError> {
            if self.conn.fail_append_at == Some(self.pending.len()) {
                return Err(StorageError::Unsupported);
            }
            self.pending.push(row.to_vec());
            Ok(())
        }

        fn flush(self: Box<Self>) -> Result<(), StorageError> {
            if self.conn.fail_commit {
                return Err(StorageError::Unsupported);
            }
            let appender = *self;
            appender.conn.committed.extend(appender.pending);
            Ok(())
        }
    }

    impl StoreConnection for RecordingConnection {
        fn supports_bulk_append(&self) -> bool {
            true
        }

        fn describe_table(&self, table: &str) -> Result<TableInfo, StorageError> {
            if table != "t" {
                return Err(StorageError::TableNotFound(table.to_string()));
            }
            Ok(TableInfo {
                name: table.to_string(),
                columns: vec!["a".into(), "b".into()],
            })
        }

        fn begin_append<'a>(
            &'a mut self,
            _table: &TableInfo,
        ) -> Result<Box<dyn Appender + 'a>, StorageError> {
            Ok(Box::new(RecordingAppender {
                conn: self,
                pending: Vec::new(),
            }))
        }
    }

    fn rows(n: i64) -> Vec<Vec<Value>> {
        (0..n)
            .map(|i| vec![Value::Integer(i), Value::Text(format!("r{i}"))])
            .collect()
    }

    #[test]
    fn test_commit_appends_all_rows() {
        let mut conn = RecordingConnection::default();
        let committed = commit_batch(&mut conn, &Batch::new("t", rows(3))).unwrap();
        assert_eq!(committed, 3);
        assert_eq!(conn.committed, rows(3));
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut conn = RecordingConnection::default();
        // Table does not exist, but an empty batch never touches the store.
        let committed = commit_batch(&mut conn, &Batch::new("missing", vec![])).unwrap();
        assert_eq!(committed, 0);
    }

    #[test]
    fn test_missing_table() {
        let mut conn = RecordingConnection::default();
        let err = commit_batch(&mut conn, &Batch::new("missing", rows(1))).unwrap_err();
        assert!(matches!(err, BatchError::Table(StorageError::TableNotFound(_))));
    }

    #[test]
    fn test_column_count_mismatch_names_row() {
        let mut conn = RecordingConnection::default();
        let mut bad = rows(2);
        bad[1].push(Value::Null);

        let err = commit_batch(&mut conn, &Batch::new("t", bad)).unwrap_err();
        assert!(matches!(
            err,
            BatchError::ColumnCount {
                row: 1,
                expected: 2,
                found: 3
            }
        ));
        assert!(conn.committed.is_empty());
    }

    #[test]
    fn test_append_failure_aborts_batch() {
        let mut conn = RecordingConnection {
            fail_append_at: Some(1),
            ..Default::default()
        };
        let err = commit_batch(&mut conn, &Batch::new("t", rows(3))).unwrap_err();
        assert!(matches!(err, BatchError::Append { row: 1, .. }));
        assert!(conn.committed.is_empty());
    }

    #[test]
    fn test_commit_failure() {
        let mut conn = RecordingConnection {
            fail_commit: true,
            ..Default::default()
        };
        let err = commit_batch(&mut conn, &Batch::new("t", rows(1))).unwrap_err();
        assert!(matches!(err, BatchError::Commit(_)));
        assert_eq!(err.kind(), "commit");
        assert!(conn.committed.is_empty());
    }
}
