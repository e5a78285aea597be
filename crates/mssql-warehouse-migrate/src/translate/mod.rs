//! Schema translation feedback loop.
//!
//! The orchestrator asks a [`TranslationOracle`] for target DDL, executes the
//! candidate through the [`DdlExecutor`], and on failure gathers diagnostic
//! context from the [`KnowledgeService`] before asking again. The loop is
//! bounded by `max_attempts`; every attempt is recorded in an
//! [`AttemptHistory`] that is returned with the committed DDL or inside
//! [`MigrateError::FatalTranslation`].
//!
//! ```text
//! Init -> Translating -> Executing -> Success
//!              ^             |
//!              |             v
//!              +---- NeedsDiagnostics ---> FatalFailure (attempts == max)
//! ```

pub mod executor;
pub mod knowledge;
pub mod oracle;

pub use executor::DdlExecutor;
pub use knowledge::{HttpKnowledgeService, NoKnowledge};
pub use oracle::{HttpTranslationOracle, RuleBasedTranslator};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{
    ExecutionResult, IdentifierCase, KnowledgeService, SchemaDefinition, TableIdentifier,
    Translation, TranslationOracle, TranslationRequest,
};
use crate::error::{MigrateError, Result};
use crate::typemap::map_type;

/// Longest error excerpt used as a knowledge-service query.
const MAX_QUERY_LEN: usize = 512;

/// One pass through the translate/execute loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationAttempt {
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// DDL that was executed (empty when the oracle produced nothing).
    pub candidate_ddl: String,
    /// Diagnostic context the oracle was given for this attempt.
    pub diagnostic_context: String,
    /// Error that triggered this attempt, if any.
    pub prior_error: Option<String>,
    /// Outcome of executing `candidate_ddl`.
    pub result: ExecutionResult,
}

impl TranslationAttempt {
    /// Record a successful attempt.
    pub fn succeeded(
        attempt_number: u32,
        candidate_ddl: String,
        diagnostic_context: String,
        prior_error: Option<String>,
    ) -> Self {
        Self {
            attempt_number,
            candidate_ddl,
            diagnostic_context,
            prior_error,
            result: ExecutionResult::Success,
        }
    }

    /// Record a failed attempt.
    pub fn failed(
        attempt_number: u32,
        candidate_ddl: String,
        diagnostic_context: String,
        prior_error: Option<String>,
        message: String,
    ) -> Self {
        Self {
            attempt_number,
            candidate_ddl,
            diagnostic_context,
            prior_error,
            result: ExecutionResult::failure(message),
        }
    }

    /// Whether the candidate executed successfully.
    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }

    /// Error message of a failed attempt.
    pub fn error_message(&self) -> Option<&str> {
        self.result.error_message()
    }
}

/// Append-only attempt log capped at `max_attempts`.
#[derive(Debug, Clone)]
pub struct AttemptHistory {
    attempts: Vec<TranslationAttempt>,
    max_attempts: u32,
}

impl AttemptHistory {
    /// Create an empty history.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts: Vec::with_capacity(max_attempts as usize),
            max_attempts,
        }
    }

    /// Number of the next attempt (1-based).
    pub fn next_number(&self) -> u32 {
        self.attempts.len() as u32 + 1
    }

    /// Record an attempt. Returns false (and drops it) once the cap is reached.
    pub fn push(&mut self, attempt: TranslationAttempt) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts.push(attempt);
        true
    }

    /// Whether no further attempts are allowed.
    pub fn is_exhausted(&self) -> bool {
        self.attempts.len() as u32 >= self.max_attempts
    }

    /// Number of recorded attempts.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    /// Most recent attempt.
    pub fn last(&self) -> Option<&TranslationAttempt> {
        self.attempts.last()
    }

    /// Consume the history.
    pub fn into_vec(self) -> Vec<TranslationAttempt> {
        self.attempts
    }
}

/// States of the translation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationState {
    /// Nothing attempted yet.
    Init,
    /// Waiting on the oracle.
    Translating,
    /// Candidate received, about to be executed.
    Executing(String),
    /// Last attempt failed with this message and attempts remain.
    NeedsDiagnostics(String),
    /// Candidate executed; the table exists on the target.
    Success(String),
    /// Attempts exhausted.
    FatalFailure,
}

/// DDL that was applied to the target, with the attempts that led to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedSchema {
    /// The DDL that executed successfully.
    pub ddl: String,
    /// Every attempt, the successful one last.
    pub attempts: Vec<TranslationAttempt>,
}

/// Translation loop settings.
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    /// Maximum number of translate/execute attempts.
    pub max_attempts: u32,
    /// Timeout for one oracle call.
    pub oracle_timeout: Duration,
    /// Timeout for one knowledge-service search.
    pub knowledge_timeout: Duration,
    /// Number of knowledge results folded into the diagnostic context.
    pub knowledge_top_k: usize,
    /// Case target column names are created in.
    pub identifier_case: IdentifierCase,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            oracle_timeout: Duration::from_secs(120),
            knowledge_timeout: Duration::from_secs(30),
            knowledge_top_k: 3,
            identifier_case: IdentifierCase::default(),
        }
    }
}

/// Drives the translate/execute/diagnose loop for one table at a time.
pub struct TranslationOrchestrator {
    oracle: Arc<dyn TranslationOracle>,
    knowledge: Arc<dyn KnowledgeService>,
    executor: DdlExecutor,
    config: TranslationConfig,
}

impl TranslationOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        oracle: Arc<dyn TranslationOracle>,
        knowledge: Arc<dyn KnowledgeService>,
        executor: DdlExecutor,
        config: TranslationConfig,
    ) -> Self {
        Self {
            oracle,
            knowledge,
            executor,
            config,
        }
    }

    /// Translate `schema` and create the target table.
    ///
    /// Returns the committed DDL and full history on success, or
    /// [`MigrateError::FatalTranslation`] carrying exactly `max_attempts`
    /// attempts.
    pub async fn translate(
        &self,
        table: &TableIdentifier,
        schema: &SchemaDefinition,
        cancel: &CancellationToken,
    ) -> Result<CommittedSchema> {
        let table_name = table.target.to_string();
        let unmapped_types = unmapped_type_hints(schema);
        if !unmapped_types.is_empty() {
            info!(
                "{}: source types without a static mapping: {}",
                table_name,
                unmapped_types.join(", ")
            );
        }

        let mut history = AttemptHistory::new(self.config.max_attempts);
        let mut state = TranslationState::Init;
        let mut last_candidate = String::new();
        let mut diagnostics = String::new();
        let mut last_error: Option<String> = None;

        loop {
            state = match state {
                TranslationState::Init => {
                    info!(
                        "{}: translating schema with oracle '{}' (max {} attempts)",
                        table_name,
                        self.oracle.name(),
                        self.config.max_attempts
                    );
                    TranslationState::Translating
                }

                TranslationState::Translating => {
                    if cancel.is_cancelled() {
                        return Err(MigrateError::Cancelled);
                    }

                    let request = TranslationRequest {
                        source_ddl: schema.ddl.clone(),
                        target_table: table_name.clone(),
                        prior_candidate: last_candidate.clone(),
                        diagnostics: diagnostics.clone(),
                        prior_error: last_error.clone().unwrap_or_default(),
                        unmapped_types: unmapped_types.clone(),
                        columns: schema.columns.clone(),
                        identifier_case: self.config.identifier_case,
                    };

                    match self.call_oracle(&request, cancel).await {
                        Ok(translation) => {
                            debug!(
                                "{}: oracle explanation: {}",
                                table_name, translation.explanation
                            );
                            TranslationState::Executing(translation.candidate_ddl)
                        }
                        Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                        Err(e) => {
                            let attempt_number = history.next_number();
                            let message = format!("oracle failed: {}", e);
                            warn!("{}: attempt {}: {}", table_name, attempt_number, message);
                            history.push(TranslationAttempt::failed(
                                attempt_number,
                                String::new(),
                                diagnostics.clone(),
                                last_error.clone(),
                                message.clone(),
                            ));
                            self.after_failure(&history, message)
                        }
                    }
                }

                TranslationState::Executing(candidate) => {
                    let attempt_number = history.next_number();
                    let result = self.executor.execute(&candidate).await;

                    match result {
                        ExecutionResult::Success => {
                            info!(
                                "{}: DDL committed on attempt {}",
                                table_name, attempt_number
                            );
                            history.push(TranslationAttempt::succeeded(
                                attempt_number,
                                candidate.clone(),
                                diagnostics.clone(),
                                last_error.clone(),
                            ));
                            TranslationState::Success(candidate)
                        }
                        ExecutionResult::Failure { message } => {
                            warn!(
                                "{}: attempt {} failed: {}",
                                table_name, attempt_number, message
                            );
                            history.push(TranslationAttempt::failed(
                                attempt_number,
                                candidate.clone(),
                                diagnostics.clone(),
                                last_error.clone(),
                                message.clone(),
                            ));
                            last_candidate = candidate;
                            self.after_failure(&history, message)
                        }
                    }
                }

                TranslationState::NeedsDiagnostics(error) => {
                    diagnostics = self.diagnose(&table_name, &error).await;
                    last_error = Some(error);
                    TranslationState::Translating
                }

                TranslationState::Success(ddl) => {
                    return Ok(CommittedSchema {
                        ddl,
                        attempts: history.into_vec(),
                    });
                }

                TranslationState::FatalFailure => {
                    return Err(MigrateError::FatalTranslation {
                        table: table_name,
                        attempts: history.into_vec(),
                    });
                }
            };
        }
    }

    fn after_failure(&self, history: &AttemptHistory, message: String) -> TranslationState {
        if history.is_exhausted() {
            TranslationState::FatalFailure
        } else {
            TranslationState::NeedsDiagnostics(message)
        }
    }

    async fn call_oracle(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<Translation> {
        let timeout = self.config.oracle_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(MigrateError::Cancelled),
            result = tokio::time::timeout(timeout, self.oracle.translate(request)) => {
                result.map_err(|_| MigrateError::timeout("Translation oracle", timeout))?
            }
        }
    }

    /// Best-effort knowledge lookup; any failure yields empty context.
    async fn diagnose(&self, table_name: &str, error: &str) -> String {
        let query = knowledge_query(error);
        let timeout = self.config.knowledge_timeout;

        match tokio::time::timeout(
            timeout,
            self.knowledge.search(&query, self.config.knowledge_top_k),
        )
        .await
        {
            Ok(Ok(context)) => {
                debug!(
                    "{}: knowledge service returned {} bytes of context",
                    table_name,
                    context.len()
                );
                context
            }
            Ok(Err(e)) => {
                warn!("{}: knowledge search failed: {}", table_name, e);
                String::new()
            }
            Err(_) => {
                warn!(
                    "{}: knowledge search timed out after {}s",
                    table_name,
                    timeout.as_secs()
                );
                String::new()
            }
        }
    }
}

/// Source type descriptors the static table cannot map, deduplicated.
pub fn unmapped_type_hints(schema: &SchemaDefinition) -> Vec<String> {
    schema
        .columns
        .iter()
        .map(|c| map_type(&c.type_descriptor()))
        .filter(|m| m.unmapped)
        .map(|m| m.target_type)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Derive a search query from a DDL error message.
fn knowledge_query(error: &str) -> String {
    let first_line = error.lines().next().unwrap_or_default().trim();
    let mut query: String = first_line.chars().take(MAX_QUERY_LEN).collect();
    if query.is_empty() {
        query.push_str("CREATE TABLE error");
    }
    query
}
