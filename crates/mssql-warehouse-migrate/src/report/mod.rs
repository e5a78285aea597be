//! Reconciliation and run reports.
//!
//! [`ReportBuilder`] turns two table fingerprints into a
//! [`ReconciliationReport`]; [`MigrationReport`] aggregates the per-table
//! outcomes of a run. Both serialize to nested JSON.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{MigrateError, Result};
use crate::transfer::TransferStats;
use crate::translate::TranslationAttempt;
use crate::verify::{ColumnComparison, ColumnPresence, ReconciliationReport, TableFingerprint};

/// Builds reconciliation reports from fingerprints.
pub struct ReportBuilder;

impl ReportBuilder {
    /// Compare source and target fingerprints of one table.
    ///
    /// Only columns present on both sides are compared; the rest are listed
    /// under `existence_mismatches`.
    pub fn reconciliation(
        table: &str,
        source: &TableFingerprint,
        target: &TableFingerprint,
    ) -> ReconciliationReport {
        let names: BTreeSet<&String> = source.columns.keys().chain(target.columns.keys()).collect();

        let mut report = ReconciliationReport {
            table: table.to_string(),
            source_row_count: source.row_count,
            target_row_count: target.row_count,
            row_count_match: source.row_count == target.row_count,
            columns: Default::default(),
            existence_mismatches: Default::default(),
        };

        for name in names {
            match (source.columns.get(name), target.columns.get(name)) {
                (Some(s), Some(t)) => {
                    report
                        .columns
                        .insert(name.clone(), ColumnComparison::new(s, t));
                }
                (s, t) => {
                    report.existence_mismatches.insert(
                        name.clone(),
                        ColumnPresence {
                            exists_in_source: s.is_some(),
                            exists_in_target: t.is_some(),
                        },
                    );
                }
            }
        }

        report
    }
}

/// Stage of the per-table workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ExistenceCheck,
    SchemaRetrieval,
    Translation,
    Transfer,
    Reconciliation,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::ExistenceCheck => "existence_check",
            Stage::SchemaRetrieval => "schema_retrieval",
            Stage::Translation => "translation",
            Stage::Transfer => "transfer",
            Stage::Reconciliation => "reconciliation",
        };
        f.write_str(s)
    }
}

/// Structured error attached to a failed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    /// Stage that failed.
    pub stage: Stage,
    /// Error message.
    pub message: String,
    /// Exit code the error maps to.
    pub exit_code: u8,
}

impl StageError {
    /// Describe `err` as a failure of `stage`.
    pub fn new(stage: Stage, err: &MigrateError) -> Self {
        Self {
            stage,
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

/// Final status of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Migrated and reconciled without discrepancies.
    Completed,
    /// Migrated, but reconciliation found discrepancies.
    Mismatch,
    /// A stage failed.
    Failed,
    /// Not attempted because the run was cancelled.
    Cancelled,
}

/// Everything known about one table after the workflow ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableOutcome {
    /// Source table name.
    pub source: String,
    /// Target table name.
    pub target: String,
    pub status: TableStatus,
    /// Whether the target table was created by this run.
    pub created: bool,
    /// DDL that created the target table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_ddl: Option<String>,
    /// Translation attempts, successful one last.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<TranslationAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferStats>,
    /// Rows committed to the target, including those of a transfer that
    /// failed part way.
    pub rows_transferred: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation: Option<ReconciliationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
    pub duration_seconds: f64,
}

impl TableOutcome {
    /// Outcome skeleton for a table about to be processed.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            status: TableStatus::Failed,
            created: false,
            committed_ddl: None,
            attempts: Vec::new(),
            transfer: None,
            rows_transferred: 0,
            reconciliation: None,
            error: None,
            duration_seconds: 0.0,
        }
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    CompletedWithMismatches,
    Failed,
    Cancelled,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    /// Hash of the configuration the run used.
    pub config_hash: String,

    /// Final status.
    pub status: RunStatus,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Total rows transferred.
    pub rows_transferred: u64,

    /// Per-table outcomes in configuration order.
    pub tables: Vec<TableOutcome>,
}

impl MigrationReport {
    /// Assemble a report from finished table outcomes.
    pub fn new(
        run_id: String,
        config_hash: String,
        started_at: DateTime<Utc>,
        tables: Vec<TableOutcome>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_transferred = tables.iter().map(|t| t.rows_transferred).sum();

        let status = if tables.iter().any(|t| t.status == TableStatus::Cancelled) {
            RunStatus::Cancelled
        } else if tables.iter().any(|t| t.status == TableStatus::Failed) {
            RunStatus::Failed
        } else if tables.iter().any(|t| t.status == TableStatus::Mismatch) {
            RunStatus::CompletedWithMismatches
        } else {
            RunStatus::Completed
        };

        Self {
            run_id,
            config_hash,
            status,
            started_at,
            completed_at,
            duration_seconds,
            rows_transferred,
            tables,
        }
    }

    /// Names of tables that failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status == TableStatus::Failed)
            .map(|t| t.target.as_str())
            .collect()
    }

    /// Exit code of the first failed table, or 0.
    pub fn exit_code(&self) -> u8 {
        if self.status == RunStatus::Cancelled {
            return MigrateError::Cancelled.exit_code();
        }
        self.tables
            .iter()
            .find_map(|t| t.error.as_ref().map(|e| e.exit_code))
            .unwrap_or(0)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Write any report as pretty JSON.
pub fn write_json<T: Serialize>(path: &Path, report: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    info!("Report written to {}", path.display());
    Ok(())
}
