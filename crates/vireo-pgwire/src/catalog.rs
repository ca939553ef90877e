//! System catalog handling
//!
//! Answers the queries drivers issue against `pg_catalog` and
//! `information_schema` during connection setup, and intercepts the
//! session commands (`SET`, `SHOW`, `RESET`, …) that never reach the
//! storage backend. Canned responses keep unmodified clients (pgbench,
//! pgx, pq, JDBC) connecting cleanly without a real catalog.

use crate::executor::{ColumnDef, QueryExecutor, ResultSet};
use crate::protocol::types;
use sqlparser::ast::{BinaryOperator, Expr, Query, Select, SetExpr, TableFactor, Value};
use tracing::debug;
use vireo_common::Result;

/// A locally-answered result: columns, rows, and the CommandComplete tag
/// when no row set applies.
#[derive(Debug, Clone, Default)]
pub struct CannedResult {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Option<String>>>,
    pub command_tag: Option<String>,
}

impl CannedResult {
    fn tag(tag: &str) -> Self {
        Self {
            command_tag: Some(tag.to_string()),
            ..Default::default()
        }
    }

    fn one_row(column: &str, type_name: &str, value: &str) -> Self {
        Self {
            columns: vec![ColumnDef::new(column, type_name)],
            rows: vec![vec![Some(value.to_string())]],
            command_tag: None,
        }
    }
}

/// Intercept session commands that are answered without parsing or
/// touching the backend. Returns `None` when the statement should go
/// through the normal dispatch path.
pub fn intercept_command(sql: &str) -> Option<CannedResult> {
    let upper = sql.to_uppercase();
    let trimmed = upper.trim().trim_end_matches(';').trim();

    if trimmed.starts_with("SET ") || trimmed == "SET" {
        return Some(CannedResult::tag("SET"));
    }

    if trimmed.starts_with("SHOW ") {
        if trimmed.contains("TRANSACTION ISOLATION") {
            return Some(CannedResult::one_row(
                "transaction_isolation",
                "text",
                "read committed",
            ));
        }
        return Some(CannedResult::one_row("setting", "text", ""));
    }

    if trimmed.starts_with("RESET ") {
        return Some(CannedResult::tag("RESET"));
    }

    if trimmed.starts_with("DEALLOCATE ") {
        return Some(CannedResult::tag("DEALLOCATE"));
    }

    if trimmed.starts_with("DISCARD ") {
        return Some(CannedResult::tag("DISCARD ALL"));
    }

    // VACUUM is a no-op for a server without its own storage
    if trimmed == "VACUUM" || trimmed.starts_with("VACUUM ") {
        return Some(CannedResult::tag("VACUUM"));
    }

    if trimmed == "SELECT VERSION()" {
        return Some(CannedResult::one_row(
            "version",
            "text",
            concat!("Vireo ", env!("CARGO_PKG_VERSION"), " (PostgreSQL 16 protocol)"),
        ));
    }

    None
}

/// Table names referenced in the FROM list, lowercased dotted form.
fn from_tables(select: &Select) -> Vec<String> {
    let mut tables = Vec::new();
    for twj in &select.from {
        collect_table(&twj.relation, &mut tables);
        for join in &twj.joins {
            collect_table(&join.relation, &mut tables);
        }
    }
    tables
}

fn collect_table(factor: &TableFactor, tables: &mut Vec<String>) {
    if let TableFactor::Table { name, .. } = factor {
        tables.push(name.to_string().to_lowercase());
    }
}

/// Whether a SELECT's FROM list references the system catalog.
pub fn references_system_catalog(select: &Select) -> bool {
    from_tables(select).iter().any(|t| {
        t.starts_with("pg_catalog.") || t.starts_with("information_schema.") || t.starts_with("pg_")
    })
}

/// Answer a system-catalog SELECT. The minimum set covers the probes
/// drivers issue on connect; anything unrecognized gets an empty
/// two-column result so clients see a well-formed row set.
pub async fn execute_system_query(
    backend: &dyn QueryExecutor,
    query: &Query,
) -> Result<ResultSet> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return Ok(empty_catalog_result()),
    };
    let tables = from_tables(select);
    let text = query.to_string().to_uppercase();

    // pgbench partition-count probe: one row (2, NULL, 0)
    if text.contains("PG_INHERITS") || text.contains("PARTSTRAT") {
        debug!("answering pgbench partition probe");
        return Ok(ResultSet {
            columns: vec![
                ColumnDef::new("n", "int4"),
                ColumnDef::new("partstrat", "char"),
                ColumnDef::new("count", "int8"),
            ],
            rows: vec![vec![
                Some("2".to_string()),
                None,
                Some("0".to_string()),
            ]],
        });
    }

    if tables
        .iter()
        .any(|t| t == "pg_type" || t == "pg_catalog.pg_type")
    {
        debug!("answering pg_type lookup from the static registry");
        return Ok(ResultSet {
            columns: vec![
                ColumnDef::new("oid", "int4"),
                ColumnDef::new("typname", "name"),
            ],
            rows: types::PG_TYPES
                .iter()
                .map(|t| vec![Some(t.oid.to_string()), Some(t.name.to_string())])
                .collect(),
        });
    }

    if tables.iter().any(|t| t == "information_schema.columns") {
        if let Some(table) = select
            .selection
            .as_ref()
            .and_then(|expr| find_string_filter(expr, "table_name"))
        {
            let columns = table_columns(backend, &table).await?;
            return Ok(ResultSet {
                columns: vec![
                    ColumnDef::new("column_name", "name"),
                    ColumnDef::new("data_type", "text"),
                ],
                rows: columns
                    .into_iter()
                    .map(|(name, type_name)| vec![Some(name), Some(type_name)])
                    .collect(),
            });
        }
    }

    Ok(empty_catalog_result())
}

/// Resolve a table's columns as an `information_schema.columns` lookup
/// would: `(column_name, data_type)` per column. Used by Describe.
pub async fn table_columns(
    backend: &dyn QueryExecutor,
    table: &str,
) -> Result<Vec<(String, String)>> {
    let schema = backend.table_schema(table).await?;
    Ok(schema
        .columns
        .into_iter()
        .map(|c| (c.name, c.type_name))
        .collect())
}

fn empty_catalog_result() -> ResultSet {
    ResultSet {
        columns: vec![
            ColumnDef::new("oid", "int4"),
            ColumnDef::new("name", "text"),
        ],
        rows: vec![],
    }
}

/// Find `column = 'literal'` in a WHERE tree, descending through ANDs.
fn find_string_filter(expr: &Expr, column: &str) -> Option<String> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::Eq => {
                let name = match left.as_ref() {
                    Expr::Identifier(ident) => ident.value.to_lowercase(),
                    Expr::CompoundIdentifier(parts) => {
                        parts.last().map(|i| i.value.to_lowercase())?
                    }
                    _ => return None,
                };
                if name != column {
                    return None;
                }
                match right.as_ref() {
                    Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
                    _ => None,
                }
            }
            BinaryOperator::And => find_string_filter(left, column)
                .or_else(|| find_string_filter(right, column)),
            _ => None,
        },
        Expr::Nested(inner) => find_string_filter(inner, column),
        _ => None,
    }
}
