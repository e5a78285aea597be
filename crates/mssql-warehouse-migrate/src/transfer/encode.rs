//! Value encoding for the two target write paths.
//!
//! - Literal encoding builds multi-row `INSERT ... VALUES` statements.
//! - CSV encoding stages a batch for one `COPY ... FROM STDIN (FORMAT csv)`.
//!
//! In both, SQL NULL and the empty string stay distinguishable.

use crate::core::identifier::quote_pg;
use crate::core::{QualifiedName, RowBatch, SqlValue};
use crate::error::Result;

/// Render a float, spelling non-finite values the way the target parses them.
fn float_text(f: f64) -> Option<String> {
    if f.is_nan() {
        Some("NaN".to_string())
    } else if f.is_infinite() {
        Some(if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else {
        None
    }
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Encode one value as a SQL literal.
pub fn encode_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        SqlValue::F32(f) => match float_text(f64::from(*f)) {
            Some(special) => quote_literal(&special),
            None => f.to_string(),
        },
        SqlValue::F64(f) => match float_text(*f) {
            Some(special) => quote_literal(&special),
            None => f.to_string(),
        },
        v if v.is_numeric() => v.to_text().unwrap_or_default(),
        v => quote_literal(&v.to_text().unwrap_or_default()),
    }
}

/// Quoted, comma-separated column list.
fn column_list(columns: &[String]) -> Result<String> {
    let quoted: Result<Vec<String>> = columns.iter().map(|c| quote_pg(c)).collect();
    Ok(quoted?.join(", "))
}

/// Build a multi-row INSERT for a batch.
///
/// `columns` are the target spellings of the batch header, in header order.
pub fn build_insert(table: &QualifiedName, columns: &[String], batch: &RowBatch) -> Result<String> {
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ",
        table.quote_pg()?,
        column_list(columns)?
    );

    for (i, row) in batch.rows.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&encode_literal(value));
        }
        sql.push(')');
    }
    Ok(sql)
}

/// COPY statement that loads one CSV-staged batch.
pub fn copy_statement(table: &QualifiedName, columns: &[String]) -> Result<String> {
    Ok(format!(
        "COPY {} ({}) FROM STDIN (FORMAT csv)",
        table.quote_pg()?,
        column_list(columns)?
    ))
}

/// Append one CSV field. NULL is an unquoted empty field.
pub fn push_csv_field(out: &mut String, value: &SqlValue) {
    match value {
        SqlValue::Null => {}
        SqlValue::F32(f) => match float_text(f64::from(*f)) {
            Some(special) => out.push_str(&special),
            None => out.push_str(&f.to_string()),
        },
        SqlValue::F64(f) => match float_text(*f) {
            Some(special) => out.push_str(&special),
            None => out.push_str(&f.to_string()),
        },
        v if v.is_numeric() || matches!(v, SqlValue::Bool(_)) => {
            out.push_str(&v.to_text().unwrap_or_default());
        }
        v => {
            out.push('"');
            out.push_str(&v.to_text().unwrap_or_default().replace('"', "\"\""));
            out.push('"');
        }
    }
}

/// Stage a whole batch as CSV text, one line per row.
pub fn encode_csv(batch: &RowBatch) -> String {
    let mut out = String::with_capacity(batch.len() * batch.columns.len() * 8);
    for row in &batch.rows {
        for (j, value) in row.iter().enumerate() {
            if j > 0 {
                out.push(',');
            }
            push_csv_field(&mut out, value);
        }
        out.push('\n');
    }
    out
}
