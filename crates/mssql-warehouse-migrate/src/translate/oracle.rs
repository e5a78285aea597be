//! Translation oracle implementations.
//!
//! - [`HttpTranslationOracle`]: hosted chat-completions endpoint
//! - [`RuleBasedTranslator`]: deterministic translation from the static type map

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::core::identifier::render_pg;
use crate::core::{Column, QualifiedName, Translation, TranslationOracle, TranslationRequest};
use crate::error::{MigrateError, Result};
use crate::typemap::map_type;

const SYSTEM_PROMPT: &str = "You translate SQL Server CREATE TABLE statements into \
PostgreSQL-compatible DDL for an analytical warehouse. Return ONLY JSON of the form \
{\"ddl\": \"<one CREATE TABLE statement>\", \"explanation\": \"<short text>\"}.";

/// Oracle backed by an OpenAI-compatible chat-completions API.
pub struct HttpTranslationOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTranslationOracle {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn call_llm(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.0
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?.error_for_status()?;
        let response_json: serde_json::Value = response.json().await?;

        response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| MigrateError::Oracle("No content in chat completion response".into()))
    }
}

#[async_trait]
impl TranslationOracle for HttpTranslationOracle {
    async fn translate(&self, request: &TranslationRequest) -> Result<Translation> {
        let prompt = build_prompt(request);
        debug!("Oracle prompt for {} ({} bytes)", request.target_table, prompt.len());
        let content = self.call_llm(&prompt).await?;
        parse_translation(&content)
    }

    fn name(&self) -> &str {
        "chat"
    }
}

/// Render the user prompt for one attempt.
pub fn build_prompt(request: &TranslationRequest) -> String {
    let mut prompt = format!(
        "Translate this SQL Server table definition into a CREATE TABLE statement for {}.\n\
         Write column names in {:?} case and leave identifiers unquoted; quote only \
         reserved words and names with characters other than letters, digits and underscores.\n\n\
         Source DDL:\n{}\n",
        request.target_table, request.identifier_case, request.source_ddl
    );

    if !request.unmapped_types.is_empty() {
        prompt.push_str(&format!(
            "\nThese source types have no direct equivalent: {}\n",
            request.unmapped_types.join(", ")
        ));
    }
    if !request.prior_candidate.is_empty() {
        prompt.push_str(&format!(
            "\nThe previous attempt was:\n{}\n",
            request.prior_candidate
        ));
    }
    if !request.prior_error.is_empty() {
        prompt.push_str(&format!(
            "\nIt failed with this error:\n{}\n",
            request.prior_error
        ));
    }
    if !request.diagnostics.is_empty() {
        prompt.push_str(&format!(
            "\nRelevant documentation:\n{}\n",
            request.diagnostics
        ));
    }
    prompt
}

#[derive(Deserialize)]
struct OracleReply {
    ddl: String,
    #[serde(default)]
    explanation: String,
}

/// Parse a model reply: JSON `{ddl, explanation}`, or bare DDL as a fallback.
pub fn parse_translation(content: &str) -> Result<Translation> {
    let body = strip_code_fence(content);

    if let Ok(reply) = serde_json::from_str::<OracleReply>(body) {
        return Ok(Translation {
            candidate_ddl: reply.ddl,
            explanation: reply.explanation,
        });
    }

    if body.trim().is_empty() {
        return Err(MigrateError::Oracle("Empty translation from oracle".into()));
    }

    Ok(Translation {
        candidate_ddl: body.trim().to_string(),
        explanation: String::new(),
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json, ```sql).
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().trim_end_matches("```").trim()
}

/// Deterministic oracle: renders DDL from structured columns via the type map.
///
/// Unmapped types are emitted verbatim on the first attempt; once the target
/// has rejected a candidate they fall back to `TEXT`.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedTranslator;

impl RuleBasedTranslator {
    /// Create a rule-based translator.
    pub fn new() -> Self {
        Self
    }

    fn render(&self, request: &TranslationRequest) -> Result<String> {
        if request.columns.is_empty() {
            return Err(MigrateError::Oracle(
                "rule-based translation needs structured source columns".into(),
            ));
        }

        let table = QualifiedName::parse(&request.target_table, "public")?;
        let widen_unmapped = !request.prior_error.is_empty();

        let mut columns = request.columns.clone();
        columns.sort_by_key(|c| c.ordinal_pos);

        let mut defs = Vec::with_capacity(columns.len());
        for col in &columns {
            defs.push(self.render_column(col, request, widen_unmapped)?);
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            table.render_pg()?,
            defs.join(",\n    ")
        ))
    }

    fn render_column(
        &self,
        col: &Column,
        request: &TranslationRequest,
        widen_unmapped: bool,
    ) -> Result<String> {
        let mapping = map_type(&col.type_descriptor());
        let target_type = if mapping.unmapped && widen_unmapped {
            "TEXT".to_string()
        } else {
            mapping.target_type
        };

        let mut def = format!(
            "{} {}",
            render_pg(&request.identifier_case.apply(&col.name))?,
            target_type
        );
        if !col.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = col.default_expr.as_deref().and_then(portable_default) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        Ok(def)
    }
}

/// Keep a source default only when it is a plain numeric or string literal.
fn portable_default(expr: &str) -> Option<String> {
    let mut inner = expr.trim();
    while inner.starts_with('(') && inner.ends_with(')') && inner.len() >= 2 {
        inner = inner[1..inner.len() - 1].trim();
    }
    if inner.parse::<f64>().is_ok() {
        return Some(inner.to_string());
    }
    let literal = inner.strip_prefix('N').unwrap_or(inner);
    if literal.len() >= 2 && literal.starts_with('\'') && literal.ends_with('\'') {
        return Some(literal.to_string());
    }
    None
}

#[async_trait]
impl TranslationOracle for RuleBasedTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<Translation> {
        let ddl = self.render(request)?;
        Ok(Translation {
            candidate_ddl: ddl,
            explanation: "rendered from the static type map".into(),
        })
    }

    fn name(&self) -> &str {
        "rules"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IdentifierCase;

    fn request() -> TranslationRequest {
        let mut id = Column::new("OrderId", "int");
        id.nullable = false;
        id.ordinal_pos = 1;
        id.default_expr = Some("((0))".into());
        let mut amount = Column::new("Amount", "decimal");
        amount.precision = 18;
        amount.scale = 2;
        amount.ordinal_pos = 2;
        let mut shape = Column::new("Shape", "geography");
        shape.ordinal_pos = 3;
        shape.default_expr = Some("(getdate())".into());

        TranslationRequest {
            source_ddl: "CREATE TABLE [dbo].[Orders] (...)".into(),
            target_table: "PUBLIC.ORDERS".into(),
            columns: vec![amount, id, shape],
            identifier_case: IdentifierCase::Upper,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_rule_based_first_attempt() {
        let translation = RuleBasedTranslator::new().translate(&request()).await.unwrap();
        assert_eq!(
            translation.candidate_ddl,
            "CREATE TABLE PUBLIC.ORDERS (\n    ORDERID INTEGER NOT NULL DEFAULT 0,\n    AMOUNT NUMERIC(18,2),\n    SHAPE geography\n)"
        );
    }

    #[tokio::test]
    async fn test_rule_based_widens_unmapped_after_error() {
        let mut req = request();
        req.prior_error = "type \"geography\" does not exist".into();
        let translation = RuleBasedTranslator::new().translate(&req).await.unwrap();
        assert!(translation.candidate_ddl.contains("SHAPE TEXT"));
    }

    #[tokio::test]
    async fn test_rule_based_quotes_only_names_that_need_it() {
        let mut req = request();
        req.identifier_case = IdentifierCase::Preserve;
        req.columns.push(Column::new("order", "int"));
        let ddl = RuleBasedTranslator::new().translate(&req).await.unwrap().candidate_ddl;
        assert!(ddl.starts_with("CREATE TABLE PUBLIC.ORDERS ("));
        assert!(ddl.contains("\"OrderId\" INTEGER"));
        assert!(ddl.contains("\"order\" INTEGER"));
    }

    #[tokio::test]
    async fn test_rule_based_requires_columns() {
        let req = TranslationRequest {
            target_table: "PUBLIC.T".into(),
            ..Default::default()
        };
        assert!(RuleBasedTranslator::new().translate(&req).await.is_err());
    }

    #[test]
    fn test_portable_default() {
        assert_eq!(portable_default("((0))").as_deref(), Some("0"));
        assert_eq!(portable_default("(N'open')").as_deref(), Some("'open'"));
        assert_eq!(portable_default("(getdate())"), None);
    }

    #[test]
    fn test_parse_translation_json() {
        let t = parse_translation(
            "```json\n{\"ddl\": \"CREATE TABLE t (a INTEGER)\", \"explanation\": \"int -> INTEGER\"}\n```",
        )
        .unwrap();
        assert_eq!(t.candidate_ddl, "CREATE TABLE t (a INTEGER)");
        assert_eq!(t.explanation, "int -> INTEGER");
    }

    #[test]
    fn test_parse_translation_bare_sql() {
        let t = parse_translation("```sql\nCREATE TABLE t (a INTEGER);\n```").unwrap();
        assert_eq!(t.candidate_ddl, "CREATE TABLE t (a INTEGER);");
        assert!(parse_translation("   ").is_err());
    }

    #[test]
    fn test_prompt_includes_feedback() {
        let mut req = request();
        req.prior_candidate = "CREATE TABLE x (a INTEGR)".into();
        req.prior_error = "type \"integr\" does not exist".into();
        req.diagnostics = "INTEGER is a 4-byte integer".into();
        req.unmapped_types = vec!["geography".into()];

        let prompt = build_prompt(&req);
        assert!(prompt.contains("PUBLIC.ORDERS"));
        assert!(prompt.contains("INTEGR)"));
        assert!(prompt.contains("does not exist"));
        assert!(prompt.contains("4-byte"));
        assert!(prompt.contains("geography"));
    }
}
