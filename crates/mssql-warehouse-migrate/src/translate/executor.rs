//! DDL submission to the target warehouse.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::{ExecutionResult, TargetWriter};

/// Submits candidate DDL to the target and reports the outcome.
///
/// Never retries; the translation loop decides what happens next.
#[derive(Clone)]
pub struct DdlExecutor {
    target: Arc<dyn TargetWriter>,
    timeout: Duration,
}

impl DdlExecutor {
    /// Create an executor with the given per-statement timeout.
    pub fn new(target: Arc<dyn TargetWriter>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Execute one DDL statement.
    ///
    /// Driver errors, pool errors and timeouts all come back as
    /// [`ExecutionResult::Failure`] carrying the raw message.
    pub async fn execute(&self, ddl: &str) -> ExecutionResult {
        let statement = prepare_ddl(ddl);
        if statement.is_empty() {
            return ExecutionResult::failure("empty DDL statement");
        }

        debug!("Executing DDL ({} bytes)", statement.len());

        match tokio::time::timeout(self.timeout, self.target.execute_ddl(statement)).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ExecutionResult::failure(e.to_string()),
            Err(_) => ExecutionResult::failure(format!(
                "DDL execution timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

/// Strip trailing whitespace and statement terminators.
pub fn prepare_ddl(ddl: &str) -> &str {
    ddl.trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
