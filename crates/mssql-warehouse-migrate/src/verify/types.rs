//! Type definitions for fingerprint reconciliation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics for one column on one side of the migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFingerprint {
    /// Case-normalized column name.
    pub column_name: String,
    /// Rows where the value is NULL or missing.
    pub null_count: u64,
    /// Distinct non-null values.
    pub distinct_count: u64,
    /// Whether the column was present in the source result set.
    pub exists_in_source: bool,
    /// Whether the column was present in the target result set.
    pub exists_in_target: bool,
}

/// Fingerprint of a whole result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFingerprint {
    /// Number of rows read.
    pub row_count: u64,
    /// Per-column statistics keyed by case-normalized name.
    pub columns: BTreeMap<String, ColumnFingerprint>,
}

/// Side-by-side comparison of a column present on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnComparison {
    /// Case-normalized column name.
    pub column_name: String,
    pub source_null_count: u64,
    pub target_null_count: u64,
    pub null_count_match: bool,
    pub source_distinct_count: u64,
    pub target_distinct_count: u64,
    pub distinct_count_match: bool,
}

impl ColumnComparison {
    /// Compare two fingerprints of the same column.
    pub fn new(source: &ColumnFingerprint, target: &ColumnFingerprint) -> Self {
        Self {
            column_name: source.column_name.clone(),
            source_null_count: source.null_count,
            target_null_count: target.null_count,
            null_count_match: source.null_count == target.null_count,
            source_distinct_count: source.distinct_count,
            target_distinct_count: target.distinct_count,
            distinct_count_match: source.distinct_count == target.distinct_count,
        }
    }

    /// Both counts match.
    pub fn is_match(&self) -> bool {
        self.null_count_match && self.distinct_count_match
    }
}

/// A column found on only one side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPresence {
    pub exists_in_source: bool,
    pub exists_in_target: bool,
}

/// Outcome of reconciling one table. Discrepancies are reported, never fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Target table name.
    pub table: String,
    pub source_row_count: u64,
    pub target_row_count: u64,
    pub row_count_match: bool,
    /// Columns present on both sides.
    pub columns: BTreeMap<String, ColumnComparison>,
    /// Columns present on one side only.
    #[serde(default)]
    pub existence_mismatches: BTreeMap<String, ColumnPresence>,
}

impl ReconciliationReport {
    /// Row counts and every shared column match, and no column is one-sided.
    pub fn is_match(&self) -> bool {
        self.row_count_match
            && self.existence_mismatches.is_empty()
            && self.columns.values().all(ColumnComparison::is_match)
    }

    /// Names of shared columns whose counts differ.
    pub fn mismatched_columns(&self) -> Vec<&str> {
        self.columns
            .values()
            .filter(|c| !c.is_match())
            .map(|c| c.column_name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(name: &str, nulls: u64, distinct: u64) -> ColumnFingerprint {
        ColumnFingerprint {
            column_name: name.into(),
            null_count: nulls,
            distinct_count: distinct,
            exists_in_source: true,
            exists_in_target: true,
        }
    }

    #[test]
    fn test_column_comparison() {
        let cmp = ColumnComparison::new(&fp("X", 1, 2), &fp("X", 1, 3));
        assert!(cmp.null_count_match);
        assert!(!cmp.distinct_count_match);
        assert!(!cmp.is_match());
    }

    #[test]
    fn test_report_serializes_as_nested_json() {
        let mut columns = BTreeMap::new();
        columns.insert("X".to_string(), ColumnComparison::new(&fp("X", 0, 1), &fp("X", 0, 1)));
        let report = ReconciliationReport {
            table: "PUBLIC.T".into(),
            source_row_count: 1,
            target_row_count: 1,
            row_count_match: true,
            columns,
            existence_mismatches: BTreeMap::new(),
        };
        assert!(report.is_match());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["columns"]["X"]["distinct_count_match"], true);
        assert_eq!(json["row_count_match"], true);
    }
}
