//! Configuration type definitions with auto-tuning based on system resources.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use crate::core::{IdentifierCase, WriteMethod};
use crate::verify::MissingColumnPolicy;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Total RAM in GB.
    pub total_memory_gb: f64,
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            total_memory_gb: sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0),
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {:.1} GB RAM, {} CPU cores",
            self.total_memory_gb, self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database configuration (MSSQL).
    pub source: SourceConfig,

    /// Target warehouse configuration (PostgreSQL wire protocol).
    pub target: TargetConfig,

    /// Translation oracle.
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Documentation search used for diagnostics.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Tables to migrate, in order.
    #[serde(default)]
    pub tables: Vec<TableMapping>,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Source database (MSSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema for unqualified table names (default: "dbo").
    #[serde(default = "default_dbo_schema")]
    pub schema: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .finish()
    }
}

/// Target warehouse configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema for target tables when a mapping gives none (default: "PUBLIC").
    #[serde(default = "default_target_schema")]
    pub schema: String,

    /// SSL mode (default: "require").
    #[serde(default = "default_require")]
    pub ssl_mode: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Which translation oracle to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleKind {
    /// Deterministic translation from the static type mapping table.
    #[default]
    Rules,
    /// Hosted chat-completion model.
    Chat,
}

/// Translation oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Oracle implementation (default: rules).
    #[serde(default)]
    pub kind: OracleKind,

    /// Base URL of the chat-completion API (required for `chat`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Model name (required for `chat`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Timeout for one oracle call in seconds (default: 120).
    #[serde(default = "default_oracle_timeout")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            endpoint: None,
            model: None,
            api_key_env: None,
            timeout_secs: default_oracle_timeout(),
        }
    }
}

impl OracleConfig {
    /// API key read from `api_key_env`, if configured and set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Which knowledge service to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    /// No documentation search; diagnostics stay empty.
    #[default]
    None,
    /// HTTP search endpoint.
    Http,
}

/// Knowledge service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Service implementation (default: none).
    #[serde(default)]
    pub kind: KnowledgeKind,

    /// Search endpoint URL (required for `http`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Number of results folded into the diagnostic context (default: 3).
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Timeout for one search in seconds (default: 30).
    #[serde(default = "default_knowledge_timeout")]
    pub timeout_secs: u64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            kind: KnowledgeKind::default(),
            endpoint: None,
            top_k: default_top_k(),
            timeout_secs: default_knowledge_timeout(),
        }
    }
}

/// One table to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Source table, `schema.table` or bare (uses `source.schema`).
    pub source: String,

    /// Target table, `schema.table` or bare (uses `target.schema`).
    /// Defaults to the source table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// What to do when the target table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IfExists {
    /// Fail the table.
    Fail,
    /// Truncate the existing table and reload it.
    #[default]
    Truncate,
    /// Load into the existing table without removing rows.
    Append,
}

/// Migration behavior configuration.
/// All performance-related fields use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Rows per batch. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    /// Read-ahead buffer count. Auto-tuned based on RAM if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_ahead_buffers: Option<usize>,

    /// Parallel writers per table. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_ahead_writers: Option<usize>,

    /// Tables migrated concurrently. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_concurrency: Option<usize>,

    /// Maximum MSSQL connections. Auto-tuned from concurrency if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_mssql_connections: Option<usize>,

    /// Maximum target connections. Auto-tuned from concurrency if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pg_connections: Option<usize>,

    /// Translate/execute attempts per table (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retries of a failed batch write (default: 3).
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Base delay between batch retries in milliseconds (default: 200).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Timeout for one batch write in seconds (default: 300).
    #[serde(default = "default_io_timeout")]
    pub write_timeout_secs: u64,

    /// Idle timeout while reading rows in seconds (default: 300).
    #[serde(default = "default_io_timeout")]
    pub read_timeout_secs: u64,

    /// Timeout for one DDL statement in seconds (default: 120).
    #[serde(default = "default_ddl_timeout")]
    pub ddl_timeout_secs: u64,

    /// Timeout for catalog lookups in seconds (default: 30).
    #[serde(default = "default_catalog_timeout")]
    pub catalog_timeout_secs: u64,

    /// How batches are submitted (default: copy).
    #[serde(default)]
    pub write_method: WriteMethod,

    /// Case of target identifiers (default: upper).
    #[serde(default)]
    pub identifier_case: IdentifierCase,

    /// Policy when the target table exists (default: truncate).
    #[serde(default)]
    pub if_exists: IfExists,

    /// Policy when a column exists on one side only (default: warn).
    #[serde(default)]
    pub missing_columns: MissingColumnPolicy,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: None,
            read_ahead_buffers: None,
            write_ahead_writers: None,
            table_concurrency: None,
            max_mssql_connections: None,
            max_pg_connections: None,
            max_attempts: default_max_attempts(),
            write_retries: default_write_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            write_timeout_secs: default_io_timeout(),
            read_timeout_secs: default_io_timeout(),
            ddl_timeout_secs: default_ddl_timeout(),
            catalog_timeout_secs: default_catalog_timeout(),
            write_method: WriteMethod::default(),
            identifier_case: IdentifierCase::default(),
            if_exists: IfExists::default(),
            missing_columns: MissingColumnPolicy::default(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let ram_gb = resources.total_memory_gb;
        let cores = resources.cpu_cores;

        // Tables in flight: half the cores, 1-8
        let concurrency = *self
            .table_concurrency
            .get_or_insert_with(|| (cores / 2).clamp(1, 8));

        // Writers per table: scale with cores, 2-8
        let writers = *self
            .write_ahead_writers
            .get_or_insert_with(|| (cores / 4).clamp(2, 8));

        // Chunk size: 10K base, +10K per 8GB of RAM, cap at 100K
        self.chunk_size
            .get_or_insert_with(|| (10_000 + (ram_gb / 8.0) as usize * 10_000).clamp(10_000, 100_000));

        // Read-ahead buffers: more RAM = deeper pipeline
        self.read_ahead_buffers
            .get_or_insert_with(|| ((ram_gb / 4.0) as usize).clamp(4, 16));

        // Each table holds one reader connection and `writers` target connections
        self.max_mssql_connections
            .get_or_insert_with(|| (concurrency * 2).clamp(4, 64));
        self.max_pg_connections
            .get_or_insert_with(|| (concurrency * (writers + 1)).clamp(4, 64));

        info!(
            "Auto-tuned config: table_concurrency={}, writers={}, chunk_size={}, read_ahead={}, \
             mssql_conns={}, pg_conns={}",
            self.get_table_concurrency(),
            self.get_write_ahead_writers(),
            self.get_chunk_size(),
            self.get_read_ahead_buffers(),
            self.get_max_mssql_connections(),
            self.get_max_pg_connections(),
        );

        self
    }

    // Accessor methods that return the effective value (with fallback defaults)
    // These are used when the config hasn't been auto-tuned yet

    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(10_000)
    }

    pub fn get_read_ahead_buffers(&self) -> usize {
        self.read_ahead_buffers.unwrap_or(4)
    }

    pub fn get_write_ahead_writers(&self) -> usize {
        self.write_ahead_writers.unwrap_or(4)
    }

    pub fn get_table_concurrency(&self) -> usize {
        self.table_concurrency.unwrap_or(2)
    }

    pub fn get_max_mssql_connections(&self) -> usize {
        self.max_mssql_connections.unwrap_or(8)
    }

    pub fn get_max_pg_connections(&self) -> usize {
        self.max_pg_connections.unwrap_or(16)
    }
}

// Default value functions for serde
fn default_mssql_port() -> u16 {
    1433
}

fn default_pg_port() -> u16 {
    5432
}

fn default_dbo_schema() -> String {
    "dbo".to_string()
}

fn default_target_schema() -> String {
    "PUBLIC".to_string()
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_require() -> String {
    "require".to_string()
}

fn default_oracle_timeout() -> u64 {
    120
}

fn default_knowledge_timeout() -> u64 {
    30
}

fn default_top_k() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    5
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_io_timeout() -> u64 {
    300
}

fn default_ddl_timeout() -> u64 {
    120
}

fn default_catalog_timeout() -> u64 {
    30
}
