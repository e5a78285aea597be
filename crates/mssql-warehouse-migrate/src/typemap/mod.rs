//! Type mapping between MSSQL and the target warehouse.
//!
//! The table is built once on first use and never mutated, so it is shared
//! freely across concurrent table migrations. Types missing from the table are
//! passed through verbatim and flagged `unmapped`; the translation
//! orchestrator forwards them to the oracle as hints.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// How the parameters of a source type carry over to the target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Params {
    /// Target type takes no parameters.
    Drop,
    /// `(n)` is kept; `(max)` or an out-of-range length falls back to the wide type.
    Length { wide: &'static str },
    /// `(p,s)` is kept.
    PrecisionScale,
}

/// Longest length the target accepts for `char`/`varchar`.
const MAX_VARCHAR_LENGTH: i64 = 10_485_760;

lazy_static! {
    static ref TYPE_TABLE: HashMap<&'static str, (&'static str, Params)> = {
        let mut m = HashMap::new();
        // Boolean
        m.insert("bit", ("BOOLEAN", Params::Drop));

        // Integer types
        m.insert("tinyint", ("SMALLINT", Params::Drop));
        m.insert("smallint", ("SMALLINT", Params::Drop));
        m.insert("int", ("INTEGER", Params::Drop));
        m.insert("bigint", ("BIGINT", Params::Drop));

        // Decimal/numeric
        m.insert("decimal", ("NUMERIC", Params::PrecisionScale));
        m.insert("numeric", ("NUMERIC", Params::PrecisionScale));
        m.insert("money", ("NUMERIC(19,4)", Params::Drop));
        m.insert("smallmoney", ("NUMERIC(10,4)", Params::Drop));

        // Floating point
        m.insert("float", ("DOUBLE PRECISION", Params::Drop));
        m.insert("real", ("REAL", Params::Drop));

        // String types
        m.insert("char", ("CHAR", Params::Length { wide: "TEXT" }));
        m.insert("nchar", ("CHAR", Params::Length { wide: "TEXT" }));
        m.insert("varchar", ("VARCHAR", Params::Length { wide: "TEXT" }));
        m.insert("nvarchar", ("VARCHAR", Params::Length { wide: "TEXT" }));
        m.insert("text", ("TEXT", Params::Drop));
        m.insert("ntext", ("TEXT", Params::Drop));
        m.insert("sysname", ("VARCHAR(128)", Params::Drop));
        m.insert("xml", ("TEXT", Params::Drop));

        // Binary types
        m.insert("binary", ("BYTEA", Params::Drop));
        m.insert("varbinary", ("BYTEA", Params::Drop));
        m.insert("image", ("BYTEA", Params::Drop));
        m.insert("timestamp", ("BYTEA", Params::Drop));
        m.insert("rowversion", ("BYTEA", Params::Drop));

        // Date/time types
        m.insert("date", ("DATE", Params::Drop));
        m.insert("time", ("TIME", Params::Drop));
        m.insert("datetime", ("TIMESTAMP", Params::Drop));
        m.insert("datetime2", ("TIMESTAMP", Params::Drop));
        m.insert("smalldatetime", ("TIMESTAMP", Params::Drop));
        m.insert("datetimeoffset", ("TIMESTAMPTZ", Params::Drop));

        // GUID
        m.insert("uniqueidentifier", ("UUID", Params::Drop));
        m
    };
}

/// Result of mapping one source type descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target type descriptor, or the source descriptor verbatim when unmapped.
    pub target_type: String,
    /// True when the source type is not in the mapping table.
    pub unmapped: bool,
}

impl TypeMapping {
    fn mapped(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            unmapped: false,
        }
    }
}

/// Map an MSSQL type descriptor (e.g. `nvarchar(50)`, `decimal(18,2)`) to the target.
pub fn map_type(source_type: &str) -> TypeMapping {
    let descriptor = source_type.trim();
    let (base, params) = split_descriptor(descriptor);

    let Some((target, rule)) = TYPE_TABLE.get(base.as_str()) else {
        return TypeMapping {
            target_type: descriptor.to_string(),
            unmapped: true,
        };
    };

    match (rule, params) {
        (Params::Drop, _) | (_, None) => TypeMapping::mapped(*target),
        (Params::Length { wide }, Some(args)) => {
            if args.eq_ignore_ascii_case("max") {
                return TypeMapping::mapped(*wide);
            }
            match args.parse::<i64>() {
                Ok(n) if n > 0 && n <= MAX_VARCHAR_LENGTH => {
                    TypeMapping::mapped(format!("{}({})", target, n))
                }
                _ => TypeMapping::mapped(*wide),
            }
        }
        (Params::PrecisionScale, Some(args)) => {
            let args: String = args.chars().filter(|c| !c.is_whitespace()).collect();
            TypeMapping::mapped(format!("{}({})", target, args))
        }
    }
}

/// Split `name(args)` into the lowercase base name and the raw argument text.
fn split_descriptor(descriptor: &str) -> (String, Option<&str>) {
    match descriptor.find('(') {
        Some(open) => {
            let base = descriptor[..open].trim().to_lowercase();
            let args = descriptor[open + 1..].trim_end().trim_end_matches(')').trim();
            (base, Some(args))
        }
        None => (descriptor.to_lowercase(), None),
    }
}
