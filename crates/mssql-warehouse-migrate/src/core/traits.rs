//! Core traits for the migration pipeline.
//!
//! This module defines the seams between the migration engine and the outside
//! world:
//!
//! - [`SourceReader`]: Reads schema and rows from the source database
//! - [`TargetWriter`]: Catalog lookups, DDL, bulk writes and read-back on the target
//! - [`TranslationOracle`]: Proposes a target DDL for a source DDL
//! - [`KnowledgeService`]: Best-effort documentation search used for diagnostics
//!
//! Every operation takes an explicit handle (`&self` of a pool-backed
//! implementation); there is no process-wide connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::identifier::{IdentifierCase, QualifiedName};
use super::schema::{Column, SchemaDefinition};
use super::value::{RowBatch, RowStream};

/// Outcome of applying a statement or batch to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// The statement was applied.
    Success,
    /// The statement failed; `message` is the raw driver message.
    Failure { message: String },
}

impl ExecutionResult {
    /// Create a failure result.
    pub fn failure(message: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            message: message.into(),
        }
    }

    /// Whether the statement succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success)
    }

    /// Error message for failures.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success => None,
            ExecutionResult::Failure { message } => Some(message),
        }
    }
}

/// How a batch is submitted to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMethod {
    /// Stage rows in a CSV buffer and issue one bulk-load statement.
    #[default]
    Copy,
    /// Multi-row INSERT with escaped literals.
    Insert,
}

/// Read schema and data from the source database.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Extract the table's schema definition.
    ///
    /// Fails with `MigrateError::SchemaRetrieval` when the table is unknown.
    async fn fetch_schema(&self, table: &QualifiedName) -> Result<SchemaDefinition>;

    /// Open a streaming read cursor over the whole table (no ordering).
    async fn read_rows(&self, table: &QualifiedName) -> Result<RowStream>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;
}

/// Catalog, DDL and data operations on the target warehouse.
#[async_trait]
pub trait TargetWriter: Send + Sync {
    /// Check if a table exists (case-insensitive match).
    async fn table_exists(&self, table: &QualifiedName) -> Result<bool>;

    /// Execute a DDL statement.
    ///
    /// Driver errors are returned as `Ok(ExecutionResult::Failure)` with the
    /// raw message; only pool/connection problems surface as `Err`.
    async fn execute_ddl(&self, ddl: &str) -> Result<ExecutionResult>;

    /// Remove every row from a table.
    async fn truncate_table(&self, table: &QualifiedName) -> Result<()>;

    /// Write one batch. Returns the number of rows applied.
    async fn write_batch(
        &self,
        table: &QualifiedName,
        batch: &RowBatch,
        method: WriteMethod,
    ) -> Result<u64>;

    /// Stream every row of a table back (for reconciliation).
    async fn query_rows(&self, table: &QualifiedName) -> Result<RowStream>;

    /// Round-trip a trivial query.
    async fn ping(&self) -> Result<()>;
}

/// Input handed to the translation oracle on each attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Source DDL (unchanged across attempts).
    pub source_ddl: String,
    /// Target table the candidate must create.
    pub target_table: String,
    /// Previous candidate, empty on the first attempt.
    pub prior_candidate: String,
    /// Diagnostic context gathered from the knowledge service.
    pub diagnostics: String,
    /// Error raised by the previous candidate.
    pub prior_error: String,
    /// Source types the static mapping table could not map.
    pub unmapped_types: Vec<String>,
    /// Structured source columns, when the source catalog provided them.
    pub columns: Vec<Column>,
    /// Case the target column names must be created in.
    pub identifier_case: IdentifierCase,
}

/// Candidate produced by the oracle. Untrusted until executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// Candidate target DDL.
    pub candidate_ddl: String,
    /// Free-text explanation (logged only).
    pub explanation: String,
}

/// Proposes target DDL for a source DDL.
///
/// Output is non-deterministic and must be validated by execution.
#[async_trait]
pub trait TranslationOracle: Send + Sync {
    /// Produce a candidate translation.
    async fn translate(&self, request: &TranslationRequest) -> Result<Translation>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

/// Best-effort documentation search.
#[async_trait]
pub trait KnowledgeService: Send + Sync {
    /// Return the top `top_k` results concatenated into one context string.
    async fn search(&self, query: &str, top_k: usize) -> Result<String>;
}
