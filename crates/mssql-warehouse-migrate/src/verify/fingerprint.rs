//! Streaming per-column statistics.
//!
//! Values are reduced to a [`ValueKey`] before distinct counting so that
//! representation differences that do not change the value collapse:
//! integer widths, trailing decimal zeros, `-0.0`, and timezone offsets of
//! the same instant.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{ColumnFingerprint, TableFingerprint};
use crate::core::identifier::fold_name;
use crate::core::{RowStream, SqlValue};
use crate::error::{MigrateError, Result};

/// Normalized, hashable form of a non-null value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
}

fn float_key(f: f64) -> ValueKey {
    if f.is_nan() {
        ValueKey::Float(f64::NAN.to_bits())
    } else if f == 0.0 {
        ValueKey::Float(0f64.to_bits())
    } else {
        ValueKey::Float(f.to_bits())
    }
}

/// Reduce a value to its key. `None` for NULL.
pub fn value_key(value: &SqlValue) -> Option<ValueKey> {
    let key = match value {
        SqlValue::Null => return None,
        SqlValue::Bool(b) => ValueKey::Bool(*b),
        SqlValue::I16(n) => ValueKey::Int(i64::from(*n)),
        SqlValue::I32(n) => ValueKey::Int(i64::from(*n)),
        SqlValue::I64(n) => ValueKey::Int(*n),
        SqlValue::F32(f) => float_key(f64::from(*f)),
        SqlValue::F64(f) => float_key(*f),
        SqlValue::Decimal(d) => ValueKey::Decimal(d.normalize().to_string()),
        SqlValue::Text(s) => ValueKey::Text(s.clone()),
        SqlValue::Bytes(b) => ValueKey::Bytes(b.clone()),
        SqlValue::Uuid(u) => ValueKey::Uuid(*u),
        SqlValue::DateTime(dt) => ValueKey::Timestamp(*dt),
        SqlValue::DateTimeOffset(dt) => ValueKey::Timestamp(dt.naive_utc()),
        SqlValue::Date(d) => ValueKey::Date(*d),
        SqlValue::Time(t) => ValueKey::Time(*t),
    };
    Some(key)
}

#[derive(Debug, Default)]
struct ColumnAccumulator {
    null_count: u64,
    distinct: HashSet<ValueKey>,
}

/// Accumulates a [`TableFingerprint`] one row at a time.
#[derive(Debug)]
pub struct FingerprintBuilder {
    names: Vec<String>,
    columns: Vec<ColumnAccumulator>,
    row_count: u64,
}

impl FingerprintBuilder {
    /// Start a fingerprint for the given header.
    ///
    /// Fails when two columns fold to the same name.
    pub fn new(columns: &[String]) -> std::result::Result<Self, String> {
        let names: Vec<String> = columns.iter().map(|c| fold_name(c)).collect();
        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(format!("column {:?} appears twice ignoring case", name));
            }
        }
        Ok(Self {
            columns: (0..names.len()).map(|_| ColumnAccumulator::default()).collect(),
            names,
            row_count: 0,
        })
    }

    /// Add one row. Positions beyond the end of a short row count as NULL.
    pub fn add_row(&mut self, row: &[SqlValue]) {
        self.row_count += 1;
        for (i, acc) in self.columns.iter_mut().enumerate() {
            match row.get(i).and_then(value_key) {
                Some(key) => {
                    acc.distinct.insert(key);
                }
                None => acc.null_count += 1,
            }
        }
    }

    /// Finish, marking every column as present on `side`.
    pub fn finish(self, side: Side) -> TableFingerprint {
        let columns: BTreeMap<String, ColumnFingerprint> = self
            .names
            .into_iter()
            .zip(self.columns)
            .map(|(name, acc)| {
                let fp = ColumnFingerprint {
                    column_name: name.clone(),
                    null_count: acc.null_count,
                    distinct_count: acc.distinct.len() as u64,
                    exists_in_source: side == Side::Source,
                    exists_in_target: side == Side::Target,
                };
                (name, fp)
            })
            .collect();

        TableFingerprint {
            row_count: self.row_count,
            columns,
        }
    }
}

/// Which side of the migration a fingerprint describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}

/// Drain a row stream of `table` into a fingerprint.
///
/// `idle_timeout` bounds the wait for each row.
pub async fn fingerprint_stream(
    table: &str,
    mut stream: RowStream,
    side: Side,
    idle_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TableFingerprint> {
    let mut builder = FingerprintBuilder::new(&stream.columns).map_err(|message| {
        MigrateError::reconcile(table, format!("{} columns: {}", side, message))
    })?;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
            next = tokio::time::timeout(idle_timeout, stream.rows.next()) => next,
        };
        match next {
            Err(_) => {
                return Err(MigrateError::timeout(
                    format!("Reading {} rows", side),
                    idle_timeout,
                ))
            }
            Ok(Some(row)) => builder.add_row(&row?),
            Ok(None) => break,
        }
    }

    Ok(builder.finish(side))
}
