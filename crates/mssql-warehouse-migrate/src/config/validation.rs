//! Configuration validation.

use std::collections::HashSet;

use super::{Config, KnowledgeKind, OracleKind};
use crate::core::identifier::fold_name;
use crate::error::{MigrateError, Result};
use crate::target::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    config.target.ssl_mode.parse::<SslMode>()?;

    // Cannot migrate to the same database
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    // Oracle and knowledge service
    if config.oracle.kind == OracleKind::Chat {
        if config.oracle.endpoint.as_deref().unwrap_or("").is_empty() {
            return Err(MigrateError::Config(
                "oracle.endpoint is required when oracle.kind is 'chat'".into(),
            ));
        }
        if config.oracle.model.as_deref().unwrap_or("").is_empty() {
            return Err(MigrateError::Config(
                "oracle.model is required when oracle.kind is 'chat'".into(),
            ));
        }
    }
    if config.oracle.timeout_secs == 0 {
        return Err(MigrateError::Config(
            "oracle.timeout_secs must be at least 1".into(),
        ));
    }
    if config.knowledge.kind == KnowledgeKind::Http
        && config.knowledge.endpoint.as_deref().unwrap_or("").is_empty()
    {
        return Err(MigrateError::Config(
            "knowledge.endpoint is required when knowledge.kind is 'http'".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    let migration = &config.migration;
    for (name, value) in [
        ("chunk_size", migration.chunk_size),
        ("read_ahead_buffers", migration.read_ahead_buffers),
        ("write_ahead_writers", migration.write_ahead_writers),
        ("table_concurrency", migration.table_concurrency),
        ("max_mssql_connections", migration.max_mssql_connections),
        ("max_pg_connections", migration.max_pg_connections),
    ] {
        if value == Some(0) {
            return Err(MigrateError::Config(format!(
                "migration.{} must be at least 1",
                name
            )));
        }
    }
    if migration.max_attempts == 0 {
        return Err(MigrateError::Config(
            "migration.max_attempts must be at least 1".into(),
        ));
    }
    if migration.write_timeout_secs == 0
        || migration.read_timeout_secs == 0
        || migration.ddl_timeout_secs == 0
        || migration.catalog_timeout_secs == 0
    {
        return Err(MigrateError::Config(
            "migration timeouts must be at least 1 second".into(),
        ));
    }

    // Tables: valid names, each target written once
    let mut targets = HashSet::new();
    for mapping in &config.tables {
        let table = config.resolve_table(mapping)?;
        let key = format!(
            "{}.{}",
            fold_name(&table.target.schema),
            fold_name(&table.target.name)
        );
        if !targets.insert(key) {
            return Err(MigrateError::Config(format!(
                "target table {} is listed more than once",
                table.target
            )));
        }
    }

    Ok(())
}
