//! Schema metadata extracted from the source database.
//!
//! A [`SchemaDefinition`] carries the raw source DDL handed to the translation
//! oracle, plus the structured column list the rule-based translator and the
//! type-mapping hints are derived from.

use serde::{Deserialize, Serialize};

use super::identifier::{quote_mssql, QualifiedName};
use crate::error::Result;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as reported by the source.
    pub name: String,

    /// Source data type (e.g., "int", "varchar", "datetime2").
    pub source_type: String,

    /// Maximum length for string/binary types (-1 for max).
    #[serde(default)]
    pub max_length: i32,

    /// Numeric precision.
    #[serde(default)]
    pub precision: i32,

    /// Numeric scale.
    #[serde(default)]
    pub scale: i32,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Default expression, verbatim from the source catalog.
    #[serde(default)]
    pub default_expr: Option<String>,

    /// Ordinal position (1-based).
    #[serde(default)]
    pub ordinal_pos: i32,
}

impl Column {
    /// Create a nullable column of the given type with no length or precision.
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            default_expr: None,
            ordinal_pos: 0,
        }
    }

    /// Full type descriptor including length/precision, e.g. `nvarchar(max)`.
    pub fn type_descriptor(&self) -> String {
        let base = self.source_type.to_lowercase();
        match base.as_str() {
            "char" | "nchar" | "varchar" | "nvarchar" | "binary" | "varbinary" => {
                if self.max_length == -1 {
                    format!("{}(max)", base)
                } else if self.max_length > 0 {
                    format!("{}({})", base, self.max_length)
                } else {
                    base
                }
            }
            "decimal" | "numeric" if self.precision > 0 => {
                format!("{}({},{})", base, self.precision, self.scale)
            }
            "datetime2" | "time" | "datetimeoffset" if self.scale > 0 => {
                format!("{}({})", base, self.scale)
            }
            _ => base,
        }
    }
}

/// Source schema: raw DDL text plus the structured column list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    /// Textual CREATE TABLE statement in the source dialect.
    pub ddl: String,

    /// Structured columns in ordinal order (may be empty when only DDL is known).
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl SchemaDefinition {
    /// Build a definition from catalog columns, rendering T-SQL DDL.
    pub fn from_columns(table: &QualifiedName, columns: Vec<Column>) -> Result<Self> {
        let mut ddl = format!("CREATE TABLE {} (\n", table.quote_mssql()?);

        for (i, col) in columns.iter().enumerate() {
            let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
            ddl.push_str(&format!(
                "    {} {} {}",
                quote_mssql(&col.name)?,
                col.type_descriptor(),
                nullable
            ));
            if let Some(default) = &col.default_expr {
                ddl.push_str(&format!(" DEFAULT {}", default));
            }
            if i + 1 < columns.len() {
                ddl.push(',');
            }
            ddl.push('\n');
        }
        ddl.push(')');

        Ok(Self { ddl, columns })
    }

    /// Build a definition from raw DDL alone.
    pub fn from_ddl(ddl: impl Into<String>) -> Self {
        Self {
            ddl: ddl.into(),
            columns: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, ty: &str, len: i32, p: i32, s: i32, nullable: bool) -> Column {
        Column {
            name: name.into(),
            source_type: ty.into(),
            max_length: len,
            precision: p,
            scale: s,
            nullable,
            default_expr: None,
            ordinal_pos: 0,
        }
    }

    #[test]
    fn test_type_descriptor() {
        assert_eq!(column("a", "nvarchar", -1, 0, 0, true).type_descriptor(), "nvarchar(max)");
        assert_eq!(column("a", "VARCHAR", 50, 0, 0, true).type_descriptor(), "varchar(50)");
        assert_eq!(column("a", "decimal", 0, 18, 2, true).type_descriptor(), "decimal(18,2)");
        assert_eq!(column("a", "int", 0, 10, 0, true).type_descriptor(), "int");
        assert_eq!(column("a", "datetime2", 0, 0, 3, true).type_descriptor(), "datetime2(3)");
    }

    #[test]
    fn test_from_columns_renders_tsql() {
        let mut id = column("Id", "int", 0, 10, 0, false);
        id.default_expr = Some("((0))".into());
        let def = SchemaDefinition::from_columns(
            &QualifiedName::new("dbo", "Orders"),
            vec![id, column("Note", "nvarchar", 200, 0, 0, true)],
        )
        .unwrap();

        assert_eq!(
            def.ddl,
            "CREATE TABLE [dbo].[Orders] (\n    [Id] int NOT NULL DEFAULT ((0)),\n    [Note] nvarchar(200) NULL\n)"
        );
        assert_eq!(def.columns.len(), 2);
    }
}
