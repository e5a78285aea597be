//! Statistical reconciliation of a migrated table.
//!
//! Both sides are read concurrently as row streams and reduced to per-column
//! fingerprints (null count, distinct count). Columns are matched by
//! case-normalized name and compared with strict equality:
//!
//! - **Row count**: total rows on each side
//! - **Null count**: NULLs plus positions missing from short rows
//! - **Distinct count**: distinct non-null values after [`fingerprint::value_key`]
//!
//! Discrepancies are reported, never resolved.

pub mod fingerprint;
pub mod types;

pub use fingerprint::{fingerprint_stream, FingerprintBuilder, Side, ValueKey};
pub use types::{
    ColumnComparison, ColumnFingerprint, ColumnPresence, ReconciliationReport, TableFingerprint,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::{SourceReader, TableIdentifier, TargetWriter};
use crate::error::{MigrateError, Result};
use crate::report::ReportBuilder;

/// What to do when a column exists on only one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingColumnPolicy {
    /// Log a warning and return the report.
    #[default]
    Warn,
    /// Return [`MigrateError::ColumnMismatch`] carrying the report.
    Fail,
}

/// Engine for fingerprint reconciliation.
pub struct ReconciliationEngine {
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    policy: MissingColumnPolicy,
    read_timeout: Duration,
}

impl ReconciliationEngine {
    /// Create a new reconciliation engine.
    pub fn new(
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        policy: MissingColumnPolicy,
        read_timeout: Duration,
    ) -> Self {
        Self {
            source,
            target,
            policy,
            read_timeout,
        }
    }

    /// Reconcile one table.
    pub async fn reconcile(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport> {
        let table_name = table.target.to_string();
        let start = Instant::now();
        info!("{}: reconciling against {}", table_name, table.source);

        let (source_fp, target_fp) = tokio::join!(
            self.fingerprint_side(table, Side::Source, cancel),
            self.fingerprint_side(table, Side::Target, cancel)
        );
        let source_fp = source_fp.map_err(|e| compute_error(&table_name, Side::Source, e))?;
        let target_fp = target_fp.map_err(|e| compute_error(&table_name, Side::Target, e))?;

        let report = ReportBuilder::reconciliation(&table_name, &source_fp, &target_fp);

        if report.is_match() {
            info!(
                "{}: reconciled {} rows, {} columns match ({:?})",
                table_name,
                report.source_row_count,
                report.columns.len(),
                start.elapsed()
            );
        } else {
            if !report.row_count_match {
                warn!(
                    "{}: row count mismatch (source={}, target={})",
                    table_name, report.source_row_count, report.target_row_count
                );
            }
            for column in report.mismatched_columns() {
                warn!("{}: column {} fingerprint mismatch", table_name, column);
            }
        }

        if !report.existence_mismatches.is_empty() {
            let names: Vec<&str> = report
                .existence_mismatches
                .keys()
                .map(String::as_str)
                .collect();
            match self.policy {
                MissingColumnPolicy::Warn => {
                    warn!(
                        "{}: columns present on one side only: {}",
                        table_name,
                        names.join(", ")
                    );
                }
                MissingColumnPolicy::Fail => {
                    return Err(MigrateError::ColumnMismatch {
                        table: table_name,
                        report: Box::new(report),
                    });
                }
            }
        }

        Ok(report)
    }

    async fn fingerprint_side(
        &self,
        table: &TableIdentifier,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<TableFingerprint> {
        let open = async {
            match side {
                Side::Source => self.source.read_rows(&table.source).await,
                Side::Target => self.target.query_rows(&table.target).await,
            }
        };
        let stream = tokio::time::timeout(self.read_timeout, open)
            .await
            .map_err(|_| MigrateError::timeout(format!("Opening {} cursor", side), self.read_timeout))??;

        fingerprint_stream(
            &table.target.to_string(),
            stream,
            side,
            self.read_timeout,
            cancel,
        )
        .await
    }
}

fn compute_error(table: &str, side: Side, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Cancelled => MigrateError::Cancelled,
        err @ MigrateError::ReconciliationCompute { .. } => err,
        other => MigrateError::reconcile(table, format!("{} read failed: {}", side, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, QualifiedName, SqlValue};
    use crate::testutil::{MemorySource, MemoryTarget};

    fn table() -> TableIdentifier {
        TableIdentifier::new(
            QualifiedName::new("dbo", "T"),
            QualifiedName::new("PUBLIC", "T"),
        )
    }

    fn engine(
        source: Arc<MemorySource>,
        target: Arc<MemoryTarget>,
        policy: MissingColumnPolicy,
    ) -> ReconciliationEngine {
        ReconciliationEngine::new(source, target, policy, Duration::from_secs(5))
    }

    fn source_with(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        source.add_table(
            QualifiedName::new("dbo", "T"),
            columns.iter().map(|c| Column::new(*c, "int")).collect(),
            rows,
        );
        source
    }

    fn target_with(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> Arc<MemoryTarget> {
        let target = Arc::new(MemoryTarget::new());
        target.load_table(
            QualifiedName::new("PUBLIC", "T"),
            columns.iter().map(|c| c.to_string()).collect(),
            rows,
        );
        target
    }

    #[tokio::test]
    async fn test_identical_tables_match() {
        let rows = vec![
            vec![SqlValue::I32(1)],
            vec![SqlValue::Null],
            vec![SqlValue::I32(1)],
        ];
        let report = engine(
            source_with(&["X"], rows.clone()),
            target_with(&["X"], rows),
            MissingColumnPolicy::Warn,
        )
        .reconcile(&table(), &CancellationToken::new())
        .await
        .unwrap();

        assert!(report.is_match());
        let x = &report.columns["X"];
        assert_eq!((x.source_null_count, x.target_null_count), (1, 1));
        assert_eq!((x.source_distinct_count, x.target_distinct_count), (1, 1));
        assert!(x.null_count_match && x.distinct_count_match);
    }

    #[tokio::test]
    async fn test_order_and_case_independent() {
        let source_rows = vec![
            vec![SqlValue::I32(1), SqlValue::Text("a".into())],
            vec![SqlValue::I32(2), SqlValue::Null],
            vec![SqlValue::I32(3), SqlValue::Text("a".into())],
        ];
        let target_rows = vec![
            vec![SqlValue::Null, SqlValue::I64(2)],
            vec![SqlValue::Text("a".into()), SqlValue::I64(3)],
            vec![SqlValue::Text("a".into()), SqlValue::I64(1)],
        ];
        let report = engine(
            source_with(&["Id", "Name"], source_rows),
            target_with(&["NAME", "ID"], target_rows),
            MissingColumnPolicy::Fail,
        )
        .reconcile(&table(), &CancellationToken::new())
        .await
        .unwrap();

        assert!(report.is_match());
        assert_eq!(report.columns.keys().collect::<Vec<_>>(), vec!["ID", "NAME"]);
        assert_eq!(report.columns["NAME"].source_distinct_count, 1);
    }

    #[tokio::test]
    async fn test_missing_target_column_warns() {
        let report = engine(
            source_with(&["X", "Y"], vec![vec![SqlValue::I32(1), SqlValue::I32(2)]]),
            target_with(&["X"], vec![vec![SqlValue::I32(1)]]),
            MissingColumnPolicy::Warn,
        )
        .reconcile(&table(), &CancellationToken::new())
        .await
        .unwrap();

        assert!(!report.columns.contains_key("Y"));
        let y = &report.existence_mismatches["Y"];
        assert!(y.exists_in_source);
        assert!(!y.exists_in_target);
        assert!(report.columns["X"].is_match());
    }

    #[tokio::test]
    async fn test_missing_target_column_fails_with_report() {
        let err = engine(
            source_with(&["X", "Y"], vec![vec![SqlValue::I32(1), SqlValue::I32(2)]]),
            target_with(&["X"], vec![vec![SqlValue::I32(1)]]),
            MissingColumnPolicy::Fail,
        )
        .reconcile(&table(), &CancellationToken::new())
        .await
        .unwrap_err();

        match err {
            MigrateError::ColumnMismatch { report, .. } => {
                assert!(report.existence_mismatches.contains_key("Y"));
                assert!(report.row_count_match);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_count_mismatches_reported() {
        let report = engine(
            source_with(&["X"], vec![vec![SqlValue::I32(1)], vec![SqlValue::I32(2)]]),
            target_with(&["X"], vec![vec![SqlValue::I32(1)]]),
            MissingColumnPolicy::Warn,
        )
        .reconcile(&table(), &CancellationToken::new())
        .await
        .unwrap();

        assert!(!report.row_count_match);
        assert!(!report.columns["X"].distinct_count_match);
        assert!(!report.is_match());
    }

    #[tokio::test]
    async fn test_read_failure_is_compute_error() {
        let source = source_with(&["X"], vec![vec![SqlValue::I32(1)]]);
        let target = Arc::new(MemoryTarget::new());
        let err = engine(source, target, MissingColumnPolicy::Warn)
            .reconcile(&table(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::ReconciliationCompute { .. }));
        assert_eq!(err.exit_code(), 6);
    }

    #[tokio::test]
    async fn test_colliding_target_columns_are_compute_error() {
        let source = source_with(&["X"], vec![vec![SqlValue::I32(1)]]);
        let target = target_with(&["x", "X"], vec![vec![SqlValue::I32(1), SqlValue::I32(1)]]);
        let err = engine(source, target, MissingColumnPolicy::Warn)
            .reconcile(&table(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 6);
        assert_eq!(
            err.to_string(),
            "Reconciliation failed for PUBLIC.T: target columns: column \"X\" appears twice ignoring case"
        );
    }
}
