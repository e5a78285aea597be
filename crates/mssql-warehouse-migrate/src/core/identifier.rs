//! Identifier validation, quoting and case normalization.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed as
//! parameters in prepared statements - only data values can be parameterized.
//! To build dynamic SQL with identifiers we:
//! 1. Validate identifiers for suspicious patterns (null bytes, excessive length)
//! 2. Apply database-specific quoting (brackets, double quotes)
//! 3. Escape the quote character within the identifier
//!
//! Source and target systems are treated as case-insensitive but
//! inconsistent, so every column and table name crossing the boundary goes
//! through [`IdentifierCase::apply`] first. Generated DDL uses
//! [`render_pg`], which leaves plain names unquoted so the target folds them
//! the way it folds any other unquoted name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrateError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes, and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Keywords PostgreSQL rejects as bare table or column names.
const PG_RESERVED: &[&str] = &[
    "ALL", "ANALYSE", "ANALYZE", "AND", "ANY", "ARRAY", "AS", "ASC", "ASYMMETRIC",
    "AUTHORIZATION", "BINARY", "BOTH", "CASE", "CAST", "CHECK", "COLLATE", "COLLATION",
    "COLUMN", "CONCURRENTLY", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_CATALOG",
    "CURRENT_DATE", "CURRENT_ROLE", "CURRENT_SCHEMA", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "CURRENT_USER", "DEFAULT", "DEFERRABLE", "DESC", "DISTINCT", "DO", "ELSE", "END",
    "EXCEPT", "FALSE", "FETCH", "FOR", "FOREIGN", "FREEZE", "FROM", "FULL", "GRANT",
    "GROUP", "HAVING", "ILIKE", "IN", "INITIALLY", "INNER", "INTERSECT", "INTO", "IS",
    "ISNULL", "JOIN", "LATERAL", "LEADING", "LEFT", "LIKE", "LIMIT", "LOCALTIME",
    "LOCALTIMESTAMP", "NATURAL", "NOT", "NOTNULL", "NULL", "OFFSET", "ON", "ONLY", "OR",
    "ORDER", "OUTER", "OVERLAPS", "PLACING", "PRIMARY", "REFERENCES", "RETURNING", "RIGHT",
    "SELECT", "SESSION_USER", "SIMILAR", "SOME", "SYMMETRIC", "SYSTEM_USER", "TABLE",
    "TABLESAMPLE", "THEN", "TO", "TRAILING", "TRUE", "UNION", "UNIQUE", "USER", "USING",
    "VARIADIC", "VERBOSE", "WHEN", "WHERE", "WINDOW", "WITH",
];

/// True when `name` can appear unquoted and mean the same name ignoring case.
fn is_plain_pg_identifier(name: &str) -> bool {
    let starts_well = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let single_case = name == name.to_ascii_uppercase() || name == name.to_ascii_lowercase();
    starts_well
        && single_case
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !PG_RESERVED.contains(&name.to_ascii_uppercase().as_str())
}

/// Render a PostgreSQL identifier for generated DDL.
///
/// Plain single-case names stay bare and are folded by the server. Mixed-case
/// names, reserved words and anything with other characters are quoted.
pub fn render_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    if is_plain_pg_identifier(name) {
        Ok(name.to_string())
    } else {
        quote_pg(name)
    }
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Case normalization applied to identifiers crossing the source/target boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierCase {
    /// Fold to uppercase (warehouse convention).
    #[default]
    Upper,
    /// Fold to lowercase (PostgreSQL convention).
    Lower,
    /// Keep names exactly as the source reports them.
    Preserve,
}

impl IdentifierCase {
    /// Normalize a single identifier.
    pub fn apply(self, name: &str) -> String {
        match self {
            IdentifierCase::Upper => name.to_uppercase(),
            IdentifierCase::Lower => name.to_lowercase(),
            IdentifierCase::Preserve => name.to_string(),
        }
    }
}

/// Canonical key for comparing names regardless of case.
pub fn fold_name(name: &str) -> String {
    name.to_uppercase()
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub name: String,
}

impl QualifiedName {
    /// Create a qualified name.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table`, falling back to `default_schema` when unqualified.
    pub fn parse(value: &str, default_schema: &str) -> Result<Self> {
        let (schema, name) = match value.split_once('.') {
            Some((schema, name)) => (schema.trim(), name.trim()),
            None => (default_schema, value.trim()),
        };
        validate_identifier(schema)?;
        validate_identifier(name)?;
        Ok(Self::new(schema, name))
    }

    /// Quote as a PostgreSQL `"schema"."table"` reference.
    pub fn quote_pg(&self) -> Result<String> {
        Ok(format!("{}.{}", quote_pg(&self.schema)?, quote_pg(&self.name)?))
    }

    /// Render as a `schema.table` reference for generated DDL.
    pub fn render_pg(&self) -> Result<String> {
        Ok(format!("{}.{}", render_pg(&self.schema)?, render_pg(&self.name)?))
    }

    /// Quote as a SQL Server `[schema].[table]` reference.
    pub fn quote_mssql(&self) -> Result<String> {
        Ok(format!(
            "{}.{}",
            quote_mssql(&self.schema)?,
            quote_mssql(&self.name)?
        ))
    }

    /// Apply identifier case normalization to both parts.
    pub fn normalized(&self, case: IdentifierCase) -> Self {
        Self::new(case.apply(&self.schema), case.apply(&self.name))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for QualifiedName {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some(_) => Self::parse(s, ""),
            None => Err(MigrateError::Config(format!(
                "table name must be schema-qualified (schema.table): {:?}",
                s
            ))),
        }
    }
}

/// Source and target names of one table migration.
///
/// Created by the caller and shared read-only by every component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentifier {
    /// Qualified name in the source database.
    pub source: QualifiedName,
    /// Qualified name in the target warehouse.
    pub target: QualifiedName,
}

impl TableIdentifier {
    /// Create a table identifier.
    pub fn new(source: QualifiedName, target: QualifiedName) -> Self {
        Self { source, target }
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}
