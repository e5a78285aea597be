//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::core::identifier::fold_name;
use crate::core::{QualifiedName, TableIdentifier};
use crate::error::{MigrateError, Result};
use crate::transfer::TransferConfig;
use crate::translate::TranslationConfig;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for run identification.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        hex::encode(Sha256::digest(yaml.as_bytes()))
    }

    /// Resolve the configured table mappings.
    ///
    /// Bare source names use `source.schema`; bare or missing target names use
    /// `target.schema`. Target names are normalized with `identifier_case`.
    pub fn table_identifiers(&self) -> Result<Vec<TableIdentifier>> {
        self.tables
            .iter()
            .map(|mapping| self.resolve_table(mapping))
            .collect()
    }

    /// Resolve one mapping.
    pub fn resolve_table(&self, mapping: &TableMapping) -> Result<TableIdentifier> {
        let source = QualifiedName::parse(&mapping.source, &self.source.schema)?;
        let target = match &mapping.target {
            Some(target) => QualifiedName::parse(target, &self.target.schema)?,
            None => QualifiedName::new(self.target.schema.clone(), source.name.clone()),
        };
        Ok(TableIdentifier::new(
            source,
            target.normalized(self.migration.identifier_case),
        ))
    }

    /// Configured tables, optionally restricted to `filter`.
    ///
    /// A filter entry matches a table by source or target name, with or
    /// without schema, ignoring case. Order follows the configuration.
    pub fn select_tables(&self, filter: &[String]) -> Result<Vec<TableIdentifier>> {
        let tables = self.table_identifiers()?;
        if tables.is_empty() {
            return Err(MigrateError::Config("no tables configured".into()));
        }
        if filter.is_empty() {
            return Ok(tables);
        }

        let keys: Vec<String> = filter.iter().map(|f| fold_name(f)).collect();
        let matches = |table: &TableIdentifier, key: &str| {
            [&table.source, &table.target]
                .iter()
                .any(|n| fold_name(&n.to_string()) == key || fold_name(&n.name) == key)
        };

        if let Some(unknown) = filter
            .iter()
            .zip(&keys)
            .find(|(_, key)| !tables.iter().any(|t| matches(t, key)))
        {
            return Err(MigrateError::Config(format!(
                "table '{}' is not in the configuration",
                unknown.0
            )));
        }

        Ok(tables
            .into_iter()
            .filter(|t| keys.iter().any(|key| matches(t, key)))
            .collect())
    }

    /// Settings for the schema translation loop.
    pub fn translation_config(&self) -> TranslationConfig {
        TranslationConfig {
            max_attempts: self.migration.max_attempts,
            oracle_timeout: Duration::from_secs(self.oracle.timeout_secs),
            knowledge_timeout: Duration::from_secs(self.knowledge.timeout_secs),
            knowledge_top_k: self.knowledge.top_k,
            identifier_case: self.migration.identifier_case,
        }
    }

    /// Settings for the batch data mover.
    pub fn transfer_config(&self) -> TransferConfig {
        let m = &self.migration;
        TransferConfig {
            chunk_size: m.get_chunk_size(),
            read_ahead: m.get_read_ahead_buffers(),
            writers: m.get_write_ahead_writers(),
            write_retries: m.write_retries,
            retry_base_delay: Duration::from_millis(m.retry_base_delay_ms),
            write_timeout: Duration::from_secs(m.write_timeout_secs),
            read_timeout: Duration::from_secs(m.read_timeout_secs),
            write_method: m.write_method,
            identifier_case: m.identifier_case,
        }
    }
}

impl SourceConfig {
    /// Build a connection string for tiberius.
    pub fn connection_string(&self) -> String {
        let encrypt = match self.encrypt.to_lowercase().as_str() {
            "false" | "no" | "0" | "disable" => "false",
            _ => "true",
        };

        format!(
            "Server=tcp:{},{};Database={};User Id={};Password={};Encrypt={};TrustServerCertificate={}",
            self.host,
            self.port,
            self.database,
            self.user,
            self.password,
            encrypt,
            self.trust_server_cert
        )
    }
}
