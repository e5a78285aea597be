//! SQL value types for database-agnostic data transfer.
//!
//! Rows travel between the source reader, the batch mover and the
//! reconciliation engine as vectors of [`SqlValue`] addressed by a shared,
//! already-normalized column header.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::Result;

/// SQL value enum for type-safe row handling.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// 16-bit signed integer (smallint, tinyint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real).
    F32(f32),

    /// 64-bit floating point (float).
    F64(f64),

    /// Decimal value with arbitrary precision (decimal, numeric, money).
    Decimal(Decimal),

    /// Text/string data.
    Text(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Whether the value is rendered as an unquoted numeric literal.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlValue::I16(_)
                | SqlValue::I32(_)
                | SqlValue::I64(_)
                | SqlValue::F32(_)
                | SqlValue::F64(_)
                | SqlValue::Decimal(_)
        )
    }

    /// Text rendering used for non-numeric literals and CSV staging.
    ///
    /// Returns `None` for NULL. Binary data is rendered as `\x`-prefixed hex.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            SqlValue::Null => return None,
            SqlValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            SqlValue::I16(n) => n.to_string(),
            SqlValue::I32(n) => n.to_string(),
            SqlValue::I64(n) => n.to_string(),
            SqlValue::F32(n) => n.to_string(),
            SqlValue::F64(n) => n.to_string(),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => format!("\\x{}", hex::encode(b)),
            SqlValue::Uuid(u) => u.to_string(),
            SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            SqlValue::DateTimeOffset(dt) => dt.to_rfc3339(),
            SqlValue::Date(d) => d.to_string(),
            SqlValue::Time(t) => t.to_string(),
        };
        Some(text)
    }
}

/// A bounded chunk of rows sharing one normalized column header.
///
/// Created per chunk by the batch mover and dropped after a successful write.
#[derive(Debug, Clone)]
pub struct RowBatch {
    /// Normalized column names, shared across every batch of a transfer.
    pub columns: Arc<[String]>,

    /// Rows in this batch; each row is positionally aligned with `columns`.
    pub rows: Vec<Vec<SqlValue>>,

    /// Sequence number assigned by the reader (for logging only).
    pub seq: u64,
}

impl RowBatch {
    /// Create a new batch with the given rows.
    pub fn new(columns: Arc<[String]>, rows: Vec<Vec<SqlValue>>, seq: u64) -> Self {
        Self { columns, rows, seq }
    }

    /// Get the number of rows in this batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A lazily evaluated, finite sequence of rows with their column header.
///
/// Every call that produces a `RowStream` opens a fresh cursor, so a table can
/// be read again from the start by asking for a new stream.
pub struct RowStream {
    /// Column names as reported by the database (not normalized).
    pub columns: Vec<String>,

    /// The rows, positionally aligned with `columns`.
    pub rows: BoxStream<'static, Result<Vec<SqlValue>>>,
}

impl RowStream {
    /// Build a stream over in-memory rows.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows: Box::pin(futures::stream::iter(rows.into_iter().map(Ok))),
        }
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}
