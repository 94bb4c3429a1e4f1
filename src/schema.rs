//! Column schema agreement between artifacts and destination tables, and the
//! SQL rendered from it.

use crate::error::ProvisionError;
use crate::types::{ColumnType, TableLoadSpec};
use std::path::Path;

/// Catalog alias the row store is attached under inside the bridge engine.
pub const ROW_STORE_ALIAS: &str = "pg";

/// Schema every destination table lives in. Both engines name it
/// explicitly; the row store's `search_path` is never consulted.
pub const ROW_STORE_SCHEMA: &str = "public";

/// A column as reported by the bridge engine for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceColumn {
    pub name: String,
    /// DuckDB type name, e.g. `VARCHAR`, `BIGINT`, `DECIMAL(18,3)`.
    pub data_type: String,
}

impl SourceColumn {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
        }
    }
}

/// Quotes an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes an SQL string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Whether a source column of DuckDB type `source` may be loaded into a
/// destination column of type `target`.
///
/// Integers widen, integers and decimals load into doubles, and booleans
/// load into integer columns as 0/1. Text only accepts text and booleans
/// only accept booleans.
pub fn types_compatible(source: &str, target: ColumnType) -> bool {
    let upper = source.trim().to_ascii_uppercase();
    let base = upper.split('(').next().unwrap_or_default().trim();

    const NARROW_INTS: &[&str] = &[
        "BOOLEAN", "TINYINT", "SMALLINT", "INTEGER", "UTINYINT", "USMALLINT",
    ];
    const WIDE_INTS: &[&str] = &["BIGINT", "UINTEGER"];
    const FLOATS: &[&str] = &["FLOAT", "DOUBLE", "DECIMAL"];

    match target {
        ColumnType::Text => base == "VARCHAR",
        ColumnType::Boolean => base == "BOOLEAN",
        ColumnType::Integer => NARROW_INTS.contains(&base),
        ColumnType::Bigint => NARROW_INTS.contains(&base) || WIDE_INTS.contains(&base),
        ColumnType::Double => {
            NARROW_INTS.contains(&base) || WIDE_INTS.contains(&base) || FLOATS.contains(&base)
        }
    }
}

/// Checks the columns of an artifact against the declared table schema.
///
/// Every declared column must be present with a compatible type, and the
/// artifact may not carry columns the table does not declare. The first
/// disagreement is reported with the table and column it concerns.
pub fn check_schema(spec: &TableLoadSpec, source: &[SourceColumn]) -> Result<(), ProvisionError> {
    let mismatch = |column: &str, detail: String| ProvisionError::Schema {
        table: spec.target_table_name.clone(),
        column: column.to_string(),
        detail,
    };

    for declared in &spec.column_schema {
        let Some(found) = source.iter().find(|c| c.name == declared.name) else {
            return Err(mismatch(
                &declared.name,
                format!(
                    "column missing from artifact '{}'",
                    spec.source_artifact
                ),
            ));
        };
        if !types_compatible(&found.data_type, declared.column_type) {
            return Err(mismatch(
                &declared.name,
                format!(
                    "source type {} cannot load into {}",
                    found.data_type, declared.column_type
                ),
            ));
        }
    }

    if let Some(extra) = source
        .iter()
        .find(|c| !spec.column_schema.iter().any(|d| d.name == c.name))
    {
        return Err(mismatch(
            &extra.name,
            format!(
                "artifact column of type {} is not declared in the table schema",
                extra.data_type
            ),
        ));
    }

    Ok(())
}

/// `DROP TABLE IF EXISTS` + `CREATE TABLE` for the row store. All columns
/// are nullable.
pub fn recreate_table_sql(spec: &TableLoadSpec) -> String {
    let table = qualified_table(&spec.target_table_name);
    let columns: Vec<String> = spec
        .column_schema
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.pg_type()))
        .collect();
    format!(
        "DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({});",
        columns.join(", ")
    )
}

/// The bridge statement run by the analytic engine: reads the artifact and
/// inserts straight into the attached row-store table, casting each column
/// to its declared type.
pub fn bridge_insert_sql(spec: &TableLoadSpec, artifact: &Path) -> String {
    let names: Vec<String> = spec
        .column_schema
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect();
    // CAST(BOOLEAN AS BIGINT) yields 0/1; NULL stays NULL for every target
    let casts: Vec<String> = spec
        .column_schema
        .iter()
        .map(|c| {
            format!(
                "CAST({} AS {})",
                quote_ident(&c.name),
                c.column_type.duckdb_type()
            )
        })
        .collect();
    format!(
        "INSERT INTO {}.{} ({}) SELECT {} FROM read_parquet({})",
        ROW_STORE_ALIAS,
        qualified_table(&spec.target_table_name),
        names.join(", "),
        casts.join(", "),
        quote_literal(&artifact.to_string_lossy())
    )
}

/// `"public"."table"` as seen from the row store.
pub fn qualified_table(table: &str) -> String {
    format!("{}.{}", quote_ident(ROW_STORE_SCHEMA), quote_ident(table))
}

/// Checks a freshly created destination table against the declared schema:
/// same columns, same order, same types. `actual` holds `(name, data_type)`
/// pairs as reported by `information_schema.columns`.
pub fn check_destination(
    spec: &TableLoadSpec,
    actual: &[(String, String)],
) -> Result<(), ProvisionError> {
    let mismatch = |column: &str, detail: String| ProvisionError::Schema {
        table: spec.target_table_name.clone(),
        column: column.to_string(),
        detail,
    };

    for (i, declared) in spec.column_schema.iter().enumerate() {
        let Some((name, data_type)) = actual.get(i) else {
            return Err(mismatch(
                &declared.name,
                "column missing from destination table".to_string(),
            ));
        };
        if name != &declared.name {
            return Err(mismatch(
                &declared.name,
                format!("destination has column '{name}' at position {}", i + 1),
            ));
        }
        let expected = declared.column_type.pg_type().to_ascii_lowercase();
        if !data_type.eq_ignore_ascii_case(&expected) {
            return Err(mismatch(
                &declared.name,
                format!("destination type {data_type}, expected {expected}"),
            ));
        }
    }

    if let Some((name, _)) = actual.get(spec.column_schema.len()) {
        return Err(mismatch(
            name,
            "destination has an undeclared column".to_string(),
        ));
    }
    Ok(())
}

/// `DESCRIBE` query listing the columns of an artifact.
pub fn describe_sql(artifact: &Path) -> String {
    format!(
        "DESCRIBE SELECT * FROM read_parquet({})",
        quote_literal(&artifact.to_string_lossy())
    )
}

/// Finds the declared column an engine error message refers to, if any.
///
/// Longer names are tried first so `startYear` is not mistaken for `Year`.
pub fn implicated_column<'a>(spec: &'a TableLoadSpec, message: &str) -> Option<&'a str> {
    let mut names: Vec<&str> = spec.column_schema.iter().map(|c| c.name.as_str()).collect();
    names.sort_by_key(|n| std::cmp::Reverse(n.len()));
    names.into_iter().find(|name| {
        message.contains(&format!("\"{name}\""))
            || message.contains(&format!("'{name}'"))
            || message.contains(&format!("column {name}"))
    })
}
