//! Error types for the migration library.

use crate::translate::TranslationAttempt;
use crate::verify::ReconciliationReport;
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Source schema could not be retrieved; nothing to translate.
    #[error("Schema retrieval failed for {table}: {message}")]
    SchemaRetrieval { table: String, message: String },

    /// Every translation attempt failed.
    #[error(
        "Schema translation for {table} failed after {} attempts; last error: {}",
        .attempts.len(),
        .attempts.last().and_then(|a| a.error_message()).unwrap_or("<none>")
    )]
    FatalTranslation {
        table: String,
        attempts: Vec<TranslationAttempt>,
    },

    /// A batch could not be written after the configured retries.
    #[error("Data write failed for table {table} after {rows_written} rows: {message}")]
    DataWrite {
        table: String,
        rows_written: u64,
        message: String,
    },

    /// Reading either side during reconciliation failed.
    #[error("Reconciliation failed for {table}: {message}")]
    ReconciliationCompute { table: String, message: String },

    /// Source and target column sets differ and the policy is `fail`.
    #[error("Column sets differ for {table}: {}", .report.existence_mismatches.keys().cloned().collect::<Vec<_>>().join(", "))]
    ColumnMismatch {
        table: String,
        report: Box<ReconciliationReport>,
    },

    /// Target table exists and the `if_exists` policy is `fail`.
    #[error("Target table {0} already exists")]
    TableExists(String),

    /// Translation oracle or knowledge service error
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// HTTP transport error (oracle / knowledge service)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// An external call did not complete in time
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a SchemaRetrieval error
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaRetrieval {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a ReconciliationCompute error
    pub fn reconcile(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::ReconciliationCompute {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Timeout error
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        MigrateError::Timeout {
            operation: operation.into(),
            seconds: timeout.as_secs(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::TableExists(_) => 1,
            MigrateError::Source(_) | MigrateError::SchemaRetrieval { .. } => 2,
            MigrateError::Target(_) | MigrateError::Pool { .. } => 3,
            MigrateError::FatalTranslation { .. } => 4,
            MigrateError::DataWrite { .. } => 5,
            MigrateError::ReconciliationCompute { .. } | MigrateError::ColumnMismatch { .. } => 6,
            MigrateError::Io(_) | MigrateError::Json(_) => 7,
            MigrateError::Oracle(_) | MigrateError::Http(_) => 8,
            MigrateError::Timeout { .. } => 9,
            MigrateError::Cancelled => 130,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        if let MigrateError::FatalTranslation { attempts, .. } = self {
            output.push_str("\nAttempt history:");
            for attempt in attempts {
                output.push_str(&format!(
                    "\n  #{}: {}",
                    attempt.attempt_number,
                    attempt.error_message().unwrap_or("ok")
                ));
            }
            output.push('\n');
        }

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
