//! Core abstractions shared by every stage of a migration.
//!
//! - [`identifier`]: Table identifiers, quoting and case normalization
//! - [`schema`]: Source column metadata and schema definitions
//! - [`value`]: SQL values, row batches and row streams
//! - [`traits`]: Source, target, oracle and knowledge-service seams
//!
//! Drivers (`source`, `target`, `translate::oracle`, `translate::knowledge`)
//! implement the traits; the engine modules (`translate`, `transfer`,
//! `verify`, `orchestrator`) only depend on them, so they can be exercised
//! with in-memory implementations.

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::{IdentifierCase, QualifiedName, TableIdentifier};
pub use schema::{Column, SchemaDefinition};
pub use traits::{
    ExecutionResult, KnowledgeService, SourceReader, TargetWriter, Translation,
    TranslationOracle, TranslationRequest, WriteMethod,
};
pub use value::{RowBatch, RowStream, SqlValue};
