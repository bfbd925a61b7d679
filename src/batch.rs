//! Row batches, the unit of work moved through the queue.
//!
//! A [`Batch`] is immutable once built. Ownership moves from the producer
//! into the queue and then to the writer thread; it is never shared.

use serde::Deserialize;
use uuid::Uuid;

use crate::generate_batch_id;

/// A dynamically typed cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// JSON scalars map onto their natural cell type. Arrays and objects are
/// stored as their JSON text.
impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Real),
            },
            serde_json::Value::String(s) => Value::Text(s),
            nested @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => {
                Value::Text(nested.to_string())
            }
        }
    }
}

/// One row: cell values in column order.
pub type Row = Vec<Value>;

/// A destination table plus the rows to append to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    id: Uuid,
    table: String,
    rows: Vec<Row>,
}

/// Wire shape of a batch in newline-delimited JSON input.
#[derive(Debug, Deserialize)]
struct BatchRecord {
    table: String,
    #[serde(default)]
    rows: Vec<Vec<serde_json::Value>>,
}

impl Batch {
    /// Create a batch with a fresh batch ID.
    pub fn new(table: impl Into<String>, rows: Vec<Row>) -> Self {
        Self {
            id: generate_batch_id(),
            table: table.into(),
            rows,
        }
    }

    /// Decode a batch from one line of JSON.
    ///
    /// The expected shape is `{"table": "events", "rows": [[1, "a"], [2, "b"]]}`.
    /// A missing `rows` field decodes as an empty batch.
    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        let record: BatchRecord = serde_json::from_str(line)?;
        let rows = record
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::from).collect())
            .collect();
        Ok(Self::new(record.table, rows))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// An empty batch is a legal no-op.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Consume the batch, returning its table name and rows.
    pub fn into_parts(self) -> (String, Vec<Row>) {
        (self.table, self.rows)
    }
}
