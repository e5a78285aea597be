//! # mssql-warehouse-migrate
//!
//! Migrates tables from Microsoft SQL Server into a PostgreSQL-wire
//! analytical warehouse.
//!
//! For each configured table the library:
//!
//! - **Checks existence** on the target and applies the `if_exists` policy
//! - **Translates the schema** with a pluggable oracle, executing each
//!   candidate against the target and feeding errors back until one commits
//! - **Transfers rows** through a bounded read-ahead / write-ahead pipeline
//! - **Reconciles** source and target with per-column null and distinct counts
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_warehouse_migrate::{Config, Orchestrator};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mssql_warehouse_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let tables = orchestrator.select_tables(&[])?;
//!     let report = orchestrator.run(&tables, &CancellationToken::new()).await?;
//!     println!("Migrated {} rows", report.rows_transferred);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod source;
pub mod target;
pub mod transfer;
pub mod translate;
pub mod typemap;
pub mod verify;

#[cfg(test)]
mod testutil;

// Re-exports for convenient access
pub use config::{Config, IfExists, MigrationConfig, SourceConfig, TargetConfig};
pub use core::{
    QualifiedName, SchemaDefinition, SourceReader, SqlValue, TableIdentifier, TargetWriter,
};
pub use error::{MigrateError, Result};
pub use orchestrator::{HealthCheckResult, Orchestrator};
pub use report::{MigrationReport, TableOutcome, TableStatus};
pub use source::MssqlSource;
pub use target::PgTarget;
pub use transfer::{BatchDataMover, TransferConfig, TransferStats};
pub use translate::{CommittedSchema, TranslationOrchestrator};
pub use verify::{ReconciliationEngine, ReconciliationReport};
