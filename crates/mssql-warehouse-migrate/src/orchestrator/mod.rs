//! Migration orchestrator - main workflow coordinator.
//!
//! Per table: existence check, then either the `if_exists` policy or schema
//! retrieval plus translation, then the batch transfer and reconciliation.
//! Tables of one run execute concurrently, bounded by `table_concurrency`;
//! each table owns its attempt history and queues.

pub mod existence;

pub use existence::ExistenceChecker;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, IfExists, KnowledgeKind, OracleKind};
use crate::core::{
    KnowledgeService, SchemaDefinition, SourceReader, TableIdentifier, TargetWriter,
    TranslationOracle,
};
use crate::error::{MigrateError, Result};
use crate::report::{MigrationReport, Stage, StageError, TableOutcome, TableStatus};
use crate::source::MssqlSource;
use crate::target::PgTarget;
use crate::transfer::BatchDataMover;
use crate::translate::{
    CommittedSchema, DdlExecutor, HttpKnowledgeService, HttpTranslationOracle, NoKnowledge,
    RuleBasedTranslator, TranslationOrchestrator,
};
use crate::verify::{ReconciliationEngine, ReconciliationReport};

type StageResult<T> = std::result::Result<T, (Stage, MigrateError)>;

/// Tag an error with the stage it came from.
fn at<T>(stage: Stage, result: Result<T>) -> StageResult<T> {
    result.map_err(|e| (stage, e))
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    oracle: Arc<dyn TranslationOracle>,
    knowledge: Arc<dyn KnowledgeService>,
    progress: Arc<AtomicU64>,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

impl Orchestrator {
    /// Create an orchestrator connected to the configured databases and services.
    pub async fn new(config: Config) -> Result<Self> {
        let m = &config.migration;
        let source = MssqlSource::connect(&config.source, m.get_max_mssql_connections() as u32)
            .await?;
        let target = PgTarget::connect(&config.target, m.get_max_pg_connections()).await?;

        let oracle: Arc<dyn TranslationOracle> = match config.oracle.kind {
            OracleKind::Rules => Arc::new(RuleBasedTranslator::new()),
            OracleKind::Chat => Arc::new(HttpTranslationOracle::new(
                config.oracle.endpoint.clone().unwrap_or_default(),
                config.oracle.model.clone().unwrap_or_default(),
                config.oracle.api_key(),
                Duration::from_secs(config.oracle.timeout_secs),
            )?),
        };
        let knowledge: Arc<dyn KnowledgeService> = match config.knowledge.kind {
            KnowledgeKind::None => Arc::new(NoKnowledge),
            KnowledgeKind::Http => Arc::new(HttpKnowledgeService::new(
                config.knowledge.endpoint.clone().unwrap_or_default(),
                Duration::from_secs(config.knowledge.timeout_secs),
            )?),
        };

        Ok(Self::with_components(
            config,
            Arc::new(source),
            Arc::new(target),
            oracle,
            knowledge,
        ))
    }

    /// Create an orchestrator over already-built components.
    pub fn with_components(
        config: Config,
        source: Arc<dyn SourceReader>,
        target: Arc<dyn TargetWriter>,
        oracle: Arc<dyn TranslationOracle>,
        knowledge: Arc<dyn KnowledgeService>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            oracle,
            knowledge,
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Rows written so far across every table of the current run.
    pub fn progress(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    /// Configured tables, optionally restricted to `filter`.
    pub fn select_tables(&self, filter: &[String]) -> Result<Vec<TableIdentifier>> {
        self.config.select_tables(filter)
    }

    /// Ping both databases and measure latency.
    pub async fn health_check(&self) -> HealthCheckResult {
        let timeout = self.catalog_timeout();

        let start = Instant::now();
        let source = tokio::time::timeout(timeout, self.source.ping()).await;
        let source_latency_ms = start.elapsed().as_millis() as u64;
        let source_error = match source {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(MigrateError::timeout("Source ping", timeout).to_string()),
        };

        let start = Instant::now();
        let target = tokio::time::timeout(timeout, self.target.ping()).await;
        let target_latency_ms = start.elapsed().as_millis() as u64;
        let target_error = match target {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(MigrateError::timeout("Target ping", timeout).to_string()),
        };

        let source_connected = source_error.is_none();
        let target_connected = target_error.is_none();
        HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        }
    }

    /// Migrate `tables`, at most `table_concurrency` at a time.
    ///
    /// Table failures are recorded in the report; only setup problems are
    /// returned as errors.
    pub async fn run(
        &self,
        tables: &[TableIdentifier],
        cancel: &CancellationToken,
    ) -> Result<MigrationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let concurrency = self.config.migration.get_table_concurrency();
        let semaphore = &Semaphore::new(concurrency);

        info!(
            "Starting migration run {}: {} tables, concurrency {}",
            run_id,
            tables.len(),
            concurrency
        );

        let outcomes = join_all(tables.iter().map(|table| async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.acquire() => permit.ok(),
            };
            if cancel.is_cancelled() {
                let mut outcome = TableOutcome::new(table.source.to_string(), table.target.to_string());
                outcome.status = TableStatus::Cancelled;
                return outcome;
            }
            self.migrate_table(table, cancel).await
        }))
        .await;

        let report = MigrationReport::new(run_id, self.config.hash(), started_at, outcomes);
        info!(
            "Migration run {} finished: {:?}, {} rows in {:.1}s",
            report.run_id, report.status, report.rows_transferred, report.duration_seconds
        );
        for name in report.failed_tables() {
            error!("{}: migration failed", name);
        }
        Ok(report)
    }

    /// Run the whole workflow for one table.
    pub async fn migrate_table(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
    ) -> TableOutcome {
        let start = Instant::now();
        let mut outcome = TableOutcome::new(table.source.to_string(), table.target.to_string());

        match self.run_stages(table, cancel, &mut outcome).await {
            Ok(report) => {
                outcome.status = if report.is_match() {
                    TableStatus::Completed
                } else {
                    TableStatus::Mismatch
                };
                outcome.reconciliation = Some(report);
            }
            Err((stage, err)) => {
                match &err {
                    MigrateError::FatalTranslation { attempts, .. } => {
                        outcome.attempts = attempts.clone();
                    }
                    MigrateError::ColumnMismatch { report, .. } => {
                        outcome.reconciliation = Some(report.as_ref().clone());
                    }
                    MigrateError::DataWrite { rows_written, .. } => {
                        outcome.rows_transferred = *rows_written;
                    }
                    _ => {}
                }
                outcome.status = if matches!(err, MigrateError::Cancelled) {
                    TableStatus::Cancelled
                } else {
                    error!("{}: {} stage failed: {}", table.target, stage, err);
                    TableStatus::Failed
                };
                outcome.error = Some(StageError::new(stage, &err));
            }
        }

        outcome.duration_seconds = start.elapsed().as_secs_f64();
        outcome
    }

    async fn run_stages(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
        outcome: &mut TableOutcome,
    ) -> StageResult<ReconciliationReport> {
        info!("{}: starting migration", table);

        let exists = at(Stage::ExistenceCheck, self.existence_checker().exists(table).await)?;
        if exists {
            at(Stage::ExistenceCheck, self.apply_if_exists(table).await)?;
        } else {
            let schema = at(Stage::SchemaRetrieval, self.fetch_schema(table).await)?;
            let committed = at(
                Stage::Translation,
                self.translator().translate(table, &schema, cancel).await,
            )?;
            outcome.created = true;
            outcome.committed_ddl = Some(committed.ddl);
            outcome.attempts = committed.attempts;
        }

        let stats = at(Stage::Transfer, self.mover().migrate(table, cancel).await)?;
        outcome.rows_transferred = stats.rows_written;
        outcome.transfer = Some(stats);

        at(
            Stage::Reconciliation,
            self.reconciler().reconcile(table, cancel).await,
        )
    }

    /// Schema translation only: create the target table and return its DDL.
    pub async fn translate_only(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
    ) -> Result<CommittedSchema> {
        if self.existence_checker().exists(table).await? {
            return Err(MigrateError::TableExists(table.target.to_string()));
        }
        let schema = self.fetch_schema(table).await?;
        self.translator().translate(table, &schema, cancel).await
    }

    /// Fingerprint comparison only.
    pub async fn reconcile_only(
        &self,
        table: &TableIdentifier,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport> {
        self.reconciler().reconcile(table, cancel).await
    }

    /// Fingerprint comparison for several tables, one after another.
    ///
    /// Results line up with `tables`. A failing table does not stop the
    /// others; once `cancel` fires the remaining tables report
    /// [`MigrateError::Cancelled`].
    pub async fn reconcile_tables(
        &self,
        tables: &[TableIdentifier],
        cancel: &CancellationToken,
    ) -> Vec<Result<ReconciliationReport>> {
        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            if cancel.is_cancelled() {
                results.push(Err(MigrateError::Cancelled));
                continue;
            }
            let result = self.reconcile_only(table, cancel).await;
            match &result {
                Err(MigrateError::Cancelled) | Ok(_) => {}
                Err(e) => error!("{}: reconciliation failed: {}", table.target, e),
            }
            results.push(result);
        }
        results
    }

    async fn apply_if_exists(&self, table: &TableIdentifier) -> Result<()> {
        match self.config.migration.if_exists {
            IfExists::Fail => Err(MigrateError::TableExists(table.target.to_string())),
            IfExists::Truncate => {
                info!("{}: target exists, truncating before load", table.target);
                let timeout = self.ddl_timeout();
                tokio::time::timeout(timeout, self.target.truncate_table(&table.target))
                    .await
                    .map_err(|_| MigrateError::timeout("Truncating target table", timeout))?
            }
            IfExists::Append => {
                warn!(
                    "{}: target exists, appending; rows already present will be duplicated",
                    table.target
                );
                Ok(())
            }
        }
    }

    async fn fetch_schema(&self, table: &TableIdentifier) -> Result<SchemaDefinition> {
        let timeout = self.catalog_timeout();
        let schema = tokio::time::timeout(timeout, self.source.fetch_schema(&table.source))
            .await
            .map_err(|_| {
                MigrateError::schema(
                    table.source.to_string(),
                    format!("catalog query timed out after {}s", timeout.as_secs()),
                )
            })??;
        info!(
            "{}: source schema has {} columns",
            table.source,
            schema.columns.len()
        );
        Ok(schema)
    }

    fn existence_checker(&self) -> ExistenceChecker {
        ExistenceChecker::new(self.target.clone(), self.catalog_timeout())
    }

    fn translator(&self) -> TranslationOrchestrator {
        TranslationOrchestrator::new(
            self.oracle.clone(),
            self.knowledge.clone(),
            DdlExecutor::new(self.target.clone(), self.ddl_timeout()),
            self.config.translation_config(),
        )
    }

    fn mover(&self) -> BatchDataMover {
        BatchDataMover::new(
            self.source.clone(),
            self.target.clone(),
            self.config.transfer_config(),
        )
        .with_progress_counter(self.progress.clone())
    }

    fn reconciler(&self) -> ReconciliationEngine {
        ReconciliationEngine::new(
            self.source.clone(),
            self.target.clone(),
            self.config.migration.missing_columns,
            Duration::from_secs(self.config.migration.read_timeout_secs),
        )
    }

    fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.config.migration.catalog_timeout_secs)
    }

    fn ddl_timeout(&self) -> Duration {
        Duration::from_secs(self.config.migration.ddl_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableMapping;
    use crate::core::{Column, ExecutionResult, QualifiedName, SqlValue};
    use crate::report::RunStatus;
    use crate::testutil::{MemorySource, MemoryTarget, ScriptedOracle};
    use crate::verify::MissingColumnPolicy;

    const YAML: &str = r#"
source:
  host: mssql.local
  database: Sales
  user: sa
target:
  host: warehouse.local
  database: analytics
  user: loader
  ssl_mode: disable
migration:
  chunk_size: 2
  write_ahead_writers: 2
  table_concurrency: 2
  retry_base_delay_ms: 1
tables:
  - source: Orders
"#;

    fn config() -> Config {
        Config::from_yaml(YAML).unwrap()
    }

    fn orders_source() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        let mut id = Column::new("Id", "int");
        id.nullable = false;
        id.ordinal_pos = 1;
        let mut note = Column::new("Note", "nvarchar");
        note.max_length = 50;
        note.ordinal_pos = 2;
        source.add_table(
            QualifiedName::new("dbo", "Orders"),
            vec![id, note],
            (1..=5)
                .map(|i| vec![SqlValue::I32(i), SqlValue::Text(format!("n{}", i % 2))])
                .collect(),
        );
        source
    }

    fn orchestrator(
        config: Config,
        source: Arc<MemorySource>,
        target: Arc<MemoryTarget>,
        oracle: Arc<dyn TranslationOracle>,
    ) -> Orchestrator {
        Orchestrator::with_components(config, source, target, oracle, Arc::new(NoKnowledge))
    }

    fn orders() -> TableIdentifier {
        TableIdentifier::new(
            QualifiedName::new("dbo", "Orders"),
            QualifiedName::new("PUBLIC", "ORDERS"),
        )
    }

    #[tokio::test]
    async fn test_full_workflow_with_rule_translator() {
        let target = Arc::new(MemoryTarget::new());
        let orch = orchestrator(
            config(),
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );
        let tables = orch.select_tables(&[]).unwrap();
        let report = orch.run(&tables, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.rows_transferred, 5);
        assert_eq!(report.exit_code(), 0);

        let outcome = &report.tables[0];
        assert!(outcome.created);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome
            .committed_ddl
            .as_deref()
            .unwrap()
            .starts_with("CREATE TABLE PUBLIC.ORDERS ("));
        let reconciliation = outcome.reconciliation.as_ref().unwrap();
        assert!(reconciliation.is_match());
        assert_eq!(reconciliation.columns["NOTE"].source_distinct_count, 2);
        assert_eq!(target.rows(&orders().target).len(), 5);
        assert_eq!(orch.progress().load(std::sync::atomic::Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_default_config_against_postgres_naming() {
        let target = Arc::new(MemoryTarget::postgres());
        let orch = orchestrator(
            config(),
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );
        let tables = orch.select_tables(&[]).unwrap();
        let report = orch.run(&tables, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.rows_transferred, 5);
        assert_eq!(report.tables[0].attempts.len(), 1);
        assert_eq!(target.table_names(), vec!["public.orders"]);
        assert_eq!(
            target.columns(&orders().target),
            Some(vec!["id".to_string(), "note".to_string()])
        );
        assert_eq!(
            target.written_columns(),
            Some(vec!["id".to_string(), "note".to_string()])
        );
        assert!(report.tables[0].reconciliation.as_ref().unwrap().is_match());
    }

    #[tokio::test]
    async fn test_existing_lowercase_table_is_reloaded() {
        let target = Arc::new(MemoryTarget::postgres());
        target.load_table(
            QualifiedName::new("public", "orders"),
            vec!["note".into(), "id".into()],
            vec![vec![SqlValue::Null, SqlValue::I32(99)]],
        );
        let mut config = config();
        config.migration.write_method = crate::core::WriteMethod::Insert;
        let orch = orchestrator(
            config,
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );

        let outcome = orch.migrate_table(&orders(), &CancellationToken::new()).await;

        assert_eq!(outcome.status, TableStatus::Completed);
        assert!(!outcome.created);
        let rows = target.rows(&orders().target);
        assert_eq!(rows.len(), 5);
        assert!(rows.contains(&vec![SqlValue::Text("n1".into()), SqlValue::I32(1)]));
    }

    #[tokio::test]
    async fn test_translation_repaired_on_third_attempt() {
        let target = Arc::new(MemoryTarget::new());
        target.script_ddl(vec![
            ExecutionResult::failure("type \"nvarchar\" does not exist"),
            ExecutionResult::failure("syntax error at or near \"(\""),
        ]);
        let oracle = Arc::new(ScriptedOracle::candidates(&[
            "CREATE TABLE \"PUBLIC\".\"ORDERS\" (\"ID\" INTEGER, \"NOTE\" NVARCHAR(50))",
            "CREATE TABLE \"PUBLIC\".\"ORDERS\" (\"ID\" INTEGER, \"NOTE\" VARCHAR(50)",
            "CREATE TABLE \"PUBLIC\".\"ORDERS\" (\"ID\" INTEGER, \"NOTE\" VARCHAR(50))",
        ]));
        let orch = orchestrator(config(), orders_source(), target, oracle.clone());

        let outcome = orch.migrate_table(&orders(), &CancellationToken::new()).await;

        assert_eq!(outcome.status, TableStatus::Completed);
        assert_eq!(outcome.attempts.len(), 3);
        assert!(outcome.attempts[2].is_success());
        assert_eq!(
            oracle.requests()[2].prior_error,
            "syntax error at or near \"(\""
        );
    }

    #[tokio::test]
    async fn test_translation_exhausted_fails_table() {
        let target = Arc::new(MemoryTarget::new());
        target.fail_ddl_with("permission denied for schema PUBLIC");
        let mut config = config();
        config.migration.max_attempts = 2;
        let orch = orchestrator(
            config,
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );

        let report = orch.run(&[orders()], &CancellationToken::new()).await.unwrap();
        let outcome = &report.tables[0];

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.exit_code(), 4);
        assert_eq!(outcome.status, TableStatus::Failed);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.error.as_ref().unwrap().stage, Stage::Translation);
        assert!(outcome.transfer.is_none());
        assert!(target.rows(&orders().target).is_empty());
    }

    #[tokio::test]
    async fn test_existing_table_is_truncated_and_reloaded() {
        let target = Arc::new(MemoryTarget::new());
        target.load_table(
            orders().target,
            vec!["ID".into(), "NOTE".into()],
            vec![vec![SqlValue::I32(99), SqlValue::Null]],
        );
        let orch = orchestrator(
            config(),
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );

        let outcome = orch.migrate_table(&orders(), &CancellationToken::new()).await;

        assert_eq!(outcome.status, TableStatus::Completed);
        assert!(!outcome.created);
        assert!(outcome.attempts.is_empty());
        assert_eq!(target.truncated(), vec!["PUBLIC.ORDERS".to_string()]);
        assert!(target.executed_ddl().is_empty());
        assert_eq!(target.rows(&orders().target).len(), 5);
    }

    #[tokio::test]
    async fn test_existing_table_with_fail_policy() {
        let target = Arc::new(MemoryTarget::new());
        target.create_table(orders().target);
        let mut config = config();
        config.migration.if_exists = IfExists::Fail;
        let orch = orchestrator(
            config,
            orders_source(),
            target,
            Arc::new(RuleBasedTranslator::new()),
        );

        let outcome = orch.migrate_table(&orders(), &CancellationToken::new()).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.stage, Stage::ExistenceCheck);
        assert_eq!(error.exit_code, 1);
    }

    #[tokio::test]
    async fn test_append_policy_reports_mismatch() {
        let target = Arc::new(MemoryTarget::new());
        target.load_table(
            orders().target,
            vec!["ID".into(), "NOTE".into()],
            vec![vec![SqlValue::I32(1), SqlValue::Text("n1".into())]],
        );
        let mut config = config();
        config.migration.if_exists = IfExists::Append;
        let orch = orchestrator(
            config,
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );

        let report = orch.run(&[orders()], &CancellationToken::new()).await.unwrap();
        assert_eq!(report.status, RunStatus::CompletedWithMismatches);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(target.rows(&orders().target).len(), 6);
        assert!(!report.tables[0].reconciliation.as_ref().unwrap().row_count_match);
    }

    #[tokio::test]
    async fn test_missing_source_table_is_schema_error() {
        let orch = orchestrator(
            config(),
            Arc::new(MemorySource::new()),
            Arc::new(MemoryTarget::new()),
            Arc::new(RuleBasedTranslator::new()),
        );

        let outcome = orch.migrate_table(&orders(), &CancellationToken::new()).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.stage, Stage::SchemaRetrieval);
        assert_eq!(error.exit_code, 2);
    }

    #[tokio::test]
    async fn test_write_failure_reports_transfer_stage() {
        let target = Arc::new(MemoryTarget::new());
        target.fail_writes_after(1);
        let mut config = config();
        config.migration.write_retries = 1;
        config.migration.write_ahead_writers = Some(1);
        let orch = orchestrator(
            config,
            orders_source(),
            target.clone(),
            Arc::new(RuleBasedTranslator::new()),
        );

        let report = orch.run(&[orders()], &CancellationToken::new()).await.unwrap();
        let outcome = &report.tables[0];
        assert_eq!(outcome.status, TableStatus::Failed);
        assert!(outcome.created);
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.stage, Stage::Transfer);
        assert_eq!(error.exit_code, 5);

        // The first batch of two rows was committed before the failure.
        assert_eq!(target.rows(&orders().target).len(), 2);
        assert_eq!(outcome.rows_transferred, 2);
        assert_eq!(report.rows_transferred, 2);
    }

    #[tokio::test]
    async fn test_missing_column_fail_policy_keeps_report() {
        let target = Arc::new(MemoryTarget::new());
        target.load_table(orders().target, vec!["ID".into()], Vec::new());
        let mut config = config();
        config.migration.missing_columns = MissingColumnPolicy::Fail;
        let orch = orchestrator(
            config,
            orders_source(),
            target,
            Arc::new(RuleBasedTranslator::new()),
        );

        let outcome = orch.reconcile_only(&orders(), &CancellationToken::new()).await;
        assert!(matches!(outcome, Err(MigrateError::ColumnMismatch { .. })));
    }

    #[tokio::test]
    async fn test_reconcile_tables_continues_after_failure() {
        let source = orders_source();
        source.add_table(
            QualifiedName::new("dbo", "Items"),
            vec![Column::new("Sku", "int")],
            vec![vec![SqlValue::I32(7)]],
        );
        let items = TableIdentifier::new(
            QualifiedName::new("dbo", "Items"),
            QualifiedName::new("PUBLIC", "ITEMS"),
        );
        let target = Arc::new(MemoryTarget::new());
        target.load_table(orders().target, vec!["ID".into()], Vec::new());
        target.load_table(
            items.target.clone(),
            vec!["SKU".into()],
            vec![vec![SqlValue::I32(7)]],
        );
        let mut config = config();
        config.migration.missing_columns = MissingColumnPolicy::Fail;
        let orch = orchestrator(config, source, target, Arc::new(RuleBasedTranslator::new()));

        let results = orch
            .reconcile_tables(&[orders(), items], &CancellationToken::new())
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(MigrateError::ColumnMismatch { .. })));
        assert!(results[1].as_ref().unwrap().is_match());
    }

    #[tokio::test]
    async fn test_cancelled_run_marks_tables() {
        let orch = orchestrator(
            config(),
            orders_source(),
            Arc::new(MemoryTarget::new()),
            Arc::new(RuleBasedTranslator::new()),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orch.run(&[orders()], &cancel).await.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(report.tables[0].status, TableStatus::Cancelled);
        assert_eq!(report.exit_code(), 130);
    }

    #[tokio::test]
    async fn test_translate_only_refuses_existing_table() {
        let target = Arc::new(MemoryTarget::new());
        target.create_table(orders().target);
        let orch = orchestrator(
            config(),
            orders_source(),
            target,
            Arc::new(RuleBasedTranslator::new()),
        );
        let err = orch
            .translate_only(&orders(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::TableExists(_)));
    }

    #[tokio::test]
    async fn test_select_tables_filter() {
        let mut config = config();
        config.tables.push(TableMapping {
            source: "sales.Customers".into(),
            target: None,
        });
        let orch = orchestrator(
            config,
            orders_source(),
            Arc::new(MemoryTarget::new()),
            Arc::new(RuleBasedTranslator::new()),
        );

        assert_eq!(orch.select_tables(&[]).unwrap().len(), 2);
        let picked = orch.select_tables(&["customers".into()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].target, QualifiedName::new("PUBLIC", "CUSTOMERS"));
        assert!(orch.select_tables(&["missing".into()]).is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let orch = orchestrator(
            config(),
            orders_source(),
            Arc::new(MemoryTarget::new()),
            Arc::new(RuleBasedTranslator::new()),
        );
        let health = orch.health_check().await;
        assert!(health.healthy);
        assert!(health.source_error.is_none());
    }
}
