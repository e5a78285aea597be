//! In-memory implementations of the core traits for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::identifier::fold_name;
use crate::core::{
    Column, ExecutionResult, KnowledgeService, QualifiedName, RowBatch, RowStream,
    SchemaDefinition, SourceReader, SqlValue, TargetWriter, Translation, TranslationOracle,
    TranslationRequest, WriteMethod,
};
use crate::error::{MigrateError, Result};
use crate::target::resolve_columns;

fn key(table: &QualifiedName) -> String {
    format!("{}.{}", fold_name(&table.schema), fold_name(&table.name))
}

struct SourceTable {
    columns: Vec<Column>,
    rows: Vec<Vec<SqlValue>>,
}

/// Source backed by in-memory tables.
#[derive(Default)]
pub struct MemorySource {
    tables: Mutex<HashMap<String, SourceTable>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, table: QualifiedName, columns: Vec<Column>, rows: Vec<Vec<SqlValue>>) {
        self.tables
            .lock()
            .unwrap()
            .insert(key(&table), SourceTable { columns, rows });
    }
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn fetch_schema(&self, table: &QualifiedName) -> Result<SchemaDefinition> {
        let columns = self
            .tables
            .lock()
            .unwrap()
            .get(&key(table))
            .map(|t| t.columns.clone())
            .ok_or_else(|| MigrateError::schema(table.to_string(), "table not found"))?;
        SchemaDefinition::from_columns(table, columns)
    }

    async fn read_rows(&self, table: &QualifiedName) -> Result<RowStream> {
        let tables = self.tables.lock().unwrap();
        let t = tables
            .get(&key(table))
            .ok_or_else(|| MigrateError::schema(table.to_string(), "table not found"))?;
        Ok(RowStream::from_rows(
            t.columns.iter().map(|c| c.name.clone()).collect(),
            t.rows.clone(),
        ))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct TargetTable {
    columns: Option<Vec<String>>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Default)]
struct TargetState {
    postgres_names: bool,
    schemas: Vec<String>,
    tables: HashMap<String, TargetTable>,
    ddl: Vec<String>,
    ddl_script: VecDeque<ExecutionResult>,
    ddl_failure: Option<String>,
    catalog_failure: Option<String>,
    fail_next_writes: usize,
    fail_writes_after: Option<usize>,
    failing_batches: HashSet<u64>,
    batch_delays: HashMap<u64, Duration>,
    successful_writes: usize,
    max_batch_len: usize,
    written_columns: Option<Vec<String>>,
    truncated: Vec<String>,
}

impl TargetState {
    /// Key a table is stored under when registered as `table`.
    fn storage_key(&self, table: &QualifiedName) -> String {
        if self.postgres_names {
            format!("{}.{}", table.schema, table.name)
        } else {
            key(table)
        }
    }

    /// Stored table `table` refers to: exact spelling first, then ignoring case.
    fn find(&self, table: &QualifiedName) -> Option<String> {
        let exact = self.storage_key(table);
        if self.tables.contains_key(&exact) {
            return Some(exact);
        }
        let folded = key(table);
        self.tables.keys().find(|k| fold_name(k) == folded).cloned()
    }

    /// Apply a `CREATE TABLE` with PostgreSQL name rules.
    fn create_as_postgres(&mut self, ddl: &str) -> ExecutionResult {
        let Some((table, columns)) = parse_create_table(ddl) else {
            return ExecutionResult::Success;
        };
        if !self.schemas.contains(&table.schema) {
            return ExecutionResult::failure(format!(
                "schema \"{}\" does not exist",
                table.schema
            ));
        }
        let k = self.storage_key(&table);
        if self.tables.contains_key(&k) {
            return ExecutionResult::failure(format!("relation \"{}\" already exists", table.name));
        }
        self.tables.insert(
            k,
            TargetTable {
                columns: Some(columns),
                rows: Vec::new(),
            },
        );
        ExecutionResult::Success
    }

    /// Append `batch` to an existing table, mapping columns like the real target.
    fn append_as_postgres(&mut self, table: &QualifiedName, batch: &RowBatch) -> Result<()> {
        let k = self.find(table).ok_or_else(|| {
            MigrateError::pool(format!("relation {} does not exist", table), "memory target")
        })?;
        let Some(t) = self.tables.get_mut(&k) else {
            return Ok(());
        };
        let table_columns = t.columns.clone().unwrap_or_default();
        let resolved = resolve_columns(table, &batch.columns, &table_columns)?;
        let positions: Vec<Option<usize>> = resolved
            .iter()
            .map(|name| table_columns.iter().position(|c| c == name))
            .collect();
        for row in &batch.rows {
            let mut stored = vec![SqlValue::Null; table_columns.len()];
            for (pos, value) in positions.iter().zip(row) {
                if let Some(pos) = pos {
                    stored[*pos] = value.clone();
                }
            }
            t.rows.push(stored);
        }
        self.written_columns = Some(resolved);
        Ok(())
    }
}

/// Target backed by in-memory tables, with injectable failures.
#[derive(Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
}

impl MemoryTarget {
    /// Target that matches every name ignoring case.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target that stores names the way PostgreSQL does.
    ///
    /// Unquoted names in DDL fold to lower case and quoted names keep their
    /// spelling. Only the `public` schema exists. Lookups ignore case but
    /// prefer the exact spelling.
    pub fn postgres() -> Self {
        let target = Self::default();
        {
            let mut state = target.state.lock().unwrap();
            state.postgres_names = true;
            state.schemas.push("public".into());
        }
        target
    }

    /// Register an empty table.
    pub fn create_table(&self, table: QualifiedName) {
        let mut state = self.state.lock().unwrap();
        let k = state.storage_key(&table);
        state.tables.entry(k).or_default();
    }

    /// Register a table with content.
    pub fn load_table(&self, table: QualifiedName, columns: Vec<String>, rows: Vec<Vec<SqlValue>>) {
        let mut state = self.state.lock().unwrap();
        let k = state.storage_key(&table);
        state.tables.insert(
            k,
            TargetTable {
                columns: Some(columns),
                rows,
            },
        );
    }

    /// Every DDL statement fails with `message`.
    pub fn fail_ddl_with(&self, message: &str) {
        self.state.lock().unwrap().ddl_failure = Some(message.to_string());
    }

    /// Results for the next DDL statements; later statements succeed.
    pub fn script_ddl(&self, results: Vec<ExecutionResult>) {
        self.state.lock().unwrap().ddl_script = results.into();
    }

    /// Catalog lookups fail with `message`.
    pub fn fail_catalog_with(&self, message: &str) {
        self.state.lock().unwrap().catalog_failure = Some(message.to_string());
    }

    /// The next `n` batch writes fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.lock().unwrap().fail_next_writes = n;
    }

    /// Every batch write after the first `n` successful ones fails.
    pub fn fail_writes_after(&self, n: usize) {
        self.state.lock().unwrap().fail_writes_after = Some(n);
    }

    /// Every write of batch `seq` fails.
    pub fn fail_batch(&self, seq: u64) {
        self.state.lock().unwrap().failing_batches.insert(seq);
    }

    /// Writes of batch `seq` take `delay` before they succeed or fail.
    pub fn delay_batch(&self, seq: u64, delay: Duration) {
        self.state.lock().unwrap().batch_delays.insert(seq, delay);
    }

    pub fn executed_ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub fn truncated(&self) -> Vec<String> {
        self.state.lock().unwrap().truncated.clone()
    }

    pub fn rows(&self, table: &QualifiedName) -> Vec<Vec<SqlValue>> {
        let state = self.state.lock().unwrap();
        state
            .find(table)
            .and_then(|k| state.tables.get(&k))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Stored names of every table, as `schema.table`.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().unwrap().tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Column names of `table` as stored.
    pub fn columns(&self, table: &QualifiedName) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .find(table)
            .and_then(|k| state.tables.get(&k))
            .and_then(|t| t.columns.clone())
    }

    pub fn max_batch_len(&self) -> usize {
        self.state.lock().unwrap().max_batch_len
    }

    pub fn written_columns(&self) -> Option<Vec<String>> {
        self.state.lock().unwrap().written_columns.clone()
    }
}

/// Table created by a `CREATE TABLE S.T (...)` statement, if recognizable.
fn created_table(ddl: &str) -> Option<QualifiedName> {
    let rest = ddl.trim_start().strip_prefix("CREATE TABLE ")?;
    let name = rest.split(|c: char| c == '(' || c.is_whitespace()).next()?;
    let name = name.replace('"', "");
    let (schema, table) = name.split_once('.')?;
    Some(QualifiedName::new(schema, table))
}

fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let input = input.trim_start();
    let head = input.get(..keyword.len())?;
    head.eq_ignore_ascii_case(keyword)
        .then(|| &input[keyword.len()..])
}

/// One identifier and the rest of the input. Quoted names keep their
/// spelling; bare names fold to lower case.
fn pg_identifier(input: &str) -> Option<(String, &str)> {
    let input = input.trim_start();
    if let Some(rest) = input.strip_prefix('"') {
        let mut name = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            if c != '"' {
                name.push(c);
            } else if rest[i + 1..].starts_with('"') {
                name.push('"');
                chars.next();
            } else {
                return Some((name, &rest[i + 1..]));
            }
        }
        return None;
    }
    let end = input
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(input.len());
    (end > 0).then(|| (input[..end].to_lowercase(), &input[end..]))
}

/// Table and column names a `CREATE TABLE` stores, after name folding.
fn parse_create_table(ddl: &str) -> Option<(QualifiedName, Vec<String>)> {
    let rest = strip_keyword(ddl, "CREATE")?;
    let rest = strip_keyword(rest, "TABLE")?;
    let (schema, rest) = pg_identifier(rest)?;
    let (name, rest) = pg_identifier(rest.trim_start().strip_prefix('.')?)?;
    let body = rest.trim_start().strip_prefix('(')?;

    let mut columns = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ',' | ')' if depth == 0 => {
                columns.extend(pg_identifier(&body[start..i]).map(|(column, _)| column));
                if c == ')' {
                    return Some((QualifiedName::new(schema, name), columns));
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
impl TargetWriter for MemoryTarget {
    async fn table_exists(&self, table: &QualifiedName) -> Result<bool> {
        let state = self.state.lock().unwrap();
        if let Some(message) = &state.catalog_failure {
            return Err(MigrateError::pool(message.clone(), "memory catalog"));
        }
        Ok(state.find(table).is_some())
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<ExecutionResult> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        state.ddl.push(ddl.to_string());

        let result = if let Some(message) = &state.ddl_failure {
            ExecutionResult::failure(message.clone())
        } else {
            state.ddl_script.pop_front().unwrap_or(ExecutionResult::Success)
        };

        if !result.is_success() {
            return Ok(result);
        }
        if state.postgres_names {
            return Ok(state.create_as_postgres(ddl));
        }
        if let Some(table) = created_table(ddl) {
            state.tables.entry(key(&table)).or_default();
        }
        Ok(result)
    }

    async fn truncate_table(&self, table: &QualifiedName) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.truncated.push(table.to_string());
        if let Some(k) = state.find(table) {
            if let Some(t) = state.tables.get_mut(&k) {
                t.rows.clear();
            }
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        table: &QualifiedName,
        batch: &RowBatch,
        _method: WriteMethod,
    ) -> Result<u64> {
        let delay = self.state.lock().unwrap().batch_delays.get(&batch.seq).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.failing_batches.contains(&batch.seq) {
            return Err(MigrateError::pool("injected write failure", "memory target"));
        }
        if state.fail_next_writes > 0 {
            state.fail_next_writes -= 1;
            return Err(MigrateError::pool("injected write failure", "memory target"));
        }
        if let Some(limit) = state.fail_writes_after {
            if state.successful_writes >= limit {
                return Err(MigrateError::pool("injected write failure", "memory target"));
            }
        }

        if state.postgres_names {
            state.append_as_postgres(table, batch)?;
        } else {
            state.written_columns = Some(batch.columns.to_vec());
            let t = state.tables.entry(key(table)).or_default();
            if t.columns.is_none() {
                t.columns = Some(batch.columns.to_vec());
            }
            t.rows.extend(batch.rows.iter().cloned());
        }
        state.successful_writes += 1;
        state.max_batch_len = state.max_batch_len.max(batch.len());
        Ok(batch.len() as u64)
    }

    async fn query_rows(&self, table: &QualifiedName) -> Result<RowStream> {
        let state = self.state.lock().unwrap();
        let t = state
            .find(table)
            .and_then(|k| state.tables.get(&k))
            .ok_or_else(|| {
                MigrateError::pool(format!("relation {} does not exist", table), "memory target")
            })?;
        Ok(RowStream::from_rows(
            t.columns.clone().unwrap_or_default(),
            t.rows.clone(),
        ))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Oracle that replays a fixed script and records every request.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<TranslationRequest>>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Oracle that returns these candidates in order.
    pub fn candidates(ddl: &[&str]) -> Self {
        Self::new(ddl.iter().map(|d| Ok(d.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<TranslationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationOracle for ScriptedOracle {
    async fn translate(&self, request: &TranslationRequest) -> Result<Translation> {
        self.requests.lock().unwrap().push(request.clone());
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(ddl)) => Ok(Translation {
                candidate_ddl: ddl,
                explanation: "scripted".into(),
            }),
            Some(Err(message)) => Err(MigrateError::Oracle(message)),
            None => Err(MigrateError::Oracle("script exhausted".into())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Knowledge service returning a fixed context and recording queries.
pub struct StaticKnowledge {
    context: String,
    queries: Mutex<Vec<String>>,
}

impl StaticKnowledge {
    pub fn new(context: &str) -> Self {
        Self {
            context: context.to_string(),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl KnowledgeService for StaticKnowledge {
    async fn search(&self, query: &str, _top_k: usize) -> Result<String> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.context.clone())
    }
}

/// Knowledge service that always errors.
pub struct FailingKnowledge;

#[async_trait]
impl KnowledgeService for FailingKnowledge {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<String> {
        Err(MigrateError::Oracle("knowledge service unavailable".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table_folds_like_postgres() {
        let (table, columns) = parse_create_table(
            "CREATE TABLE PUBLIC.ORDERS (\n    ID INTEGER NOT NULL,\n    \"Amount\" NUMERIC(18,2),\n    \"a\"\"b\" TEXT\n)",
        )
        .unwrap();
        assert_eq!(table, QualifiedName::new("public", "orders"));
        assert_eq!(columns, vec!["id", "Amount", "a\"b"]);
        assert!(parse_create_table("DROP TABLE x").is_none());
    }

    #[tokio::test]
    async fn test_postgres_names_reject_quoted_upper_schema() {
        let target = MemoryTarget::postgres();
        let result = target
            .execute_ddl("CREATE TABLE \"PUBLIC\".\"ORDERS\" (\"ID\" INTEGER)")
            .await
            .unwrap();
        assert_eq!(
            result,
            ExecutionResult::failure("schema \"PUBLIC\" does not exist")
        );

        let result = target.execute_ddl("CREATE TABLE PUBLIC.ORDERS (ID INTEGER)").await.unwrap();
        assert!(result.is_success());
        assert_eq!(target.table_names(), vec!["public.orders"]);
        assert!(target
            .table_exists(&QualifiedName::new("PUBLIC", "ORDERS"))
            .await
            .unwrap());
    }
}
