//! Target-side table existence check.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::{TableIdentifier, TargetWriter};
use crate::error::{MigrateError, Result};

/// Asks the target catalog whether a table already exists.
///
/// A catalog query failure is an error, never "does not exist".
#[derive(Clone)]
pub struct ExistenceChecker {
    target: Arc<dyn TargetWriter>,
    timeout: Duration,
}

impl ExistenceChecker {
    /// Create a checker with the given query timeout.
    pub fn new(target: Arc<dyn TargetWriter>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Whether the target table exists (case-insensitive match).
    pub async fn exists(&self, table: &TableIdentifier) -> Result<bool> {
        let exists = tokio::time::timeout(self.timeout, self.target.table_exists(&table.target))
            .await
            .map_err(|_| MigrateError::timeout("Target catalog lookup", self.timeout))??;
        debug!("{}: exists on target = {}", table.target, exists);
        Ok(exists)
    }
}
