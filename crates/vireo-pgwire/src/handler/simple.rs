//! Simple-query execution and statement dispatch
//!
//! Parses the query text, walks the statement list in order, and routes
//! each statement kind to the backend executor, serializing result sets as
//! RowDescription / DataRow / CommandComplete. The extended-protocol
//! Execute reuses the same dispatch with bound parameters substituted and
//! `max_rows` honored.

use crate::aggregate::{AggregateKind, Aggregator};
use crate::catalog::{self, CannedResult};
use crate::connection::{Connection, TxState};
use crate::executor::{ColumnDef, QueryExecutor, ResultSet};
use crate::handler::copy;
use crate::protocol::backend::{BackendMessage, FieldDescription};
use crate::protocol::constants::FORMAT_BINARY;
use crate::protocol::types;
use sqlparser::ast::{
    Expr, FromTable, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, ObjectName,
    ObjectType, Query, Select, SelectItem, SetExpr, Statement, UnaryOperator, Value,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use tracing::debug;
use vireo_common::{Result, VireoError};

/// Handle one simple-query message. The caller emits the trailing
/// ReadyForQuery.
pub(crate) async fn handle_query(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    sql: &str,
) -> Result<()> {
    if is_empty_query(sql) {
        conn.send(BackendMessage::EmptyQueryResponse).await?;
        return Ok(());
    }

    if let Some(canned) = catalog::intercept_command(sql) {
        return serialize_canned(conn, &canned).await;
    }

    if let Some(tag) = dispatch_database_ddl(backend, sql).await? {
        return complete(conn, &tag).await;
    }

    let statements = parse_sql(sql)?;
    if statements.is_empty() {
        conn.send(BackendMessage::EmptyQueryResponse).await?;
        return Ok(());
    }

    // A failing statement aborts the rest of the batch.
    for stmt in &statements {
        execute_statement(conn, backend, stmt, 0, &[]).await?;
    }
    Ok(())
}

fn is_empty_query(sql: &str) -> bool {
    sql.trim().trim_end_matches(';').trim().is_empty()
}

pub(crate) fn parse_sql(sql: &str) -> Result<Vec<Statement>> {
    Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| VireoError::Parser(e.to_string()))
}

/// Dispatch one parsed statement. `max_rows` bounds SELECT output when
/// non-zero (extended-protocol Execute); `result_formats` are the portal's
/// requested result formats.
pub(crate) async fn execute_statement(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    stmt: &Statement,
    max_rows: usize,
    result_formats: &[i16],
) -> Result<()> {
    // Inside a failed block only COMMIT/ROLLBACK get through.
    if conn.tx_state() == TxState::Failed
        && !matches!(stmt, Statement::Commit { .. } | Statement::Rollback { .. })
    {
        return Err(VireoError::TransactionAborted);
    }

    match stmt {
        Statement::StartTransaction { .. } => {
            conn.lock_transaction()?;
            backend.begin().await?;
            complete(conn, "BEGIN").await
        }
        Statement::Commit { .. } => {
            backend.commit().await?;
            conn.unlock_transaction();
            complete(conn, "COMMIT").await
        }
        Statement::Rollback { .. } => {
            backend.rollback().await?;
            conn.unlock_transaction();
            complete(conn, "ROLLBACK").await
        }

        Statement::CreateDatabase {
            db_name,
            if_not_exists,
            ..
        } => {
            backend
                .create_database(&db_name.to_string(), *if_not_exists)
                .await?;
            complete(conn, "CREATE DATABASE").await
        }
        Statement::CreateTable(_) => {
            backend.create_table(stmt).await?;
            complete(conn, "CREATE TABLE").await
        }
        Statement::AlterTable { .. } => {
            backend.alter_table(stmt).await?;
            complete(conn, "ALTER TABLE").await
        }
        Statement::CreateIndex(_) => {
            backend.create_index(stmt).await?;
            complete(conn, "CREATE INDEX").await
        }
        Statement::Drop {
            object_type,
            if_exists,
            names,
            ..
        } => {
            for name in names {
                let object = object_name_str(name);
                match object_type {
                    ObjectType::Table => backend.drop_table(&object, *if_exists).await?,
                    ObjectType::Index => backend.drop_index(&object, *if_exists).await?,
                    other if other.to_string().eq_ignore_ascii_case("database") => {
                        backend.drop_database(&object, *if_exists).await?
                    }
                    other => {
                        return Err(VireoError::NotSupported(format!("DROP {}", other)));
                    }
                }
            }
            complete(conn, &format!("DROP {}", object_type.to_string().to_uppercase())).await
        }

        Statement::Insert(insert) => {
            let table = object_name_str(&insert.table_name);
            let columns: Vec<String> = insert.columns.iter().map(|c| c.value.clone()).collect();
            let rows = insert_rows(insert.source.as_deref())?;
            let count = backend.insert(&table, &columns, &rows).await?;
            complete(conn, &format!("INSERT 0 {}", count)).await
        }
        Statement::Update { .. } => {
            let count = backend.update(stmt).await?;
            complete(conn, &format!("UPDATE {}", count)).await
        }
        Statement::Delete(delete) => {
            let from = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            let table = from
                .first()
                .and_then(|twj| match &twj.relation {
                    sqlparser::ast::TableFactor::Table { name, .. } => Some(object_name_str(name)),
                    _ => None,
                })
                .ok_or_else(|| VireoError::NotSupported("DELETE without a plain table".into()))?;
            let count = backend.delete(&table, delete.selection.as_ref()).await?;
            complete(conn, &format!("DELETE {}", count)).await
        }
        Statement::Truncate { table_names, .. } => {
            // expands to a DELETE per named table
            for target in table_names {
                let table = object_name_str(&target.name);
                backend.delete(&table, None).await?;
            }
            complete(conn, "TRUNCATE").await
        }

        Statement::Query(query) => {
            execute_select(conn, backend, query, max_rows, result_formats).await
        }

        Statement::Copy {
            source,
            to,
            target,
            options,
            legacy_options,
            ..
        } => copy::run_copy_in(conn, backend, source, *to, target, options, legacy_options).await,

        other => Err(VireoError::NotSupported(format!(
            "statement not supported: {}",
            statement_verb(other)
        ))),
    }
}

/// Serialize a SELECT: RowDescription, rows (aggregated when the
/// projection carries aggregate functions, honoring LIMIT/OFFSET and
/// `max_rows`), then CommandComplete or PortalSuspended on truncation.
async fn execute_select(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    query: &Query,
    max_rows: usize,
    result_formats: &[i16],
) -> Result<()> {
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => Some(select.as_ref()),
        _ => None,
    };

    let result = match select {
        Some(select) if catalog::references_system_catalog(select) => {
            catalog::execute_system_query(backend, query).await?
        }
        _ => backend.query(query).await?,
    };

    let (columns, rows) = match select.and_then(|s| aggregate_plan(s, &result)) {
        Some((mut aggregator, out_columns)) => {
            // aggregate functions buffer the full row set first
            for row in &result.rows {
                aggregator.aggregate(row)?;
            }
            (out_columns, aggregator.finalize())
        }
        None => (result.columns, result.rows),
    };

    if result_formats.contains(&FORMAT_BINARY) {
        debug!("client requested binary result format; sending text");
    }

    let fields = columns
        .iter()
        .map(|c| FieldDescription::new(&c.name, types::oid_of(&c.type_name), types::size_of(&c.type_name)))
        .collect();
    conn.send(BackendMessage::RowDescription { fields }).await?;

    let offset = query
        .offset
        .as_ref()
        .and_then(|o| eval_unsigned(&o.value))
        .unwrap_or(0);
    let limit = query.limit.as_ref().and_then(eval_unsigned);

    let mut sent = 0usize;
    let mut suspended = false;
    for row in rows
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
    {
        if max_rows > 0 && sent >= max_rows {
            suspended = true;
            break;
        }
        conn.send(BackendMessage::DataRow {
            values: row.into_iter().map(|v| v.map(String::into_bytes)).collect(),
        })
        .await?;
        sent += 1;
    }

    if suspended {
        conn.send(BackendMessage::PortalSuspended).await?;
        Ok(())
    } else {
        complete(conn, &format!("SELECT {}", sent)).await
    }
}

/// Build the aggregation pass for a SELECT whose projection contains
/// aggregate functions. Returns the aggregator plus the output columns
/// (group key first when grouping).
fn aggregate_plan(select: &Select, result: &ResultSet) -> Option<(Aggregator, Vec<ColumnDef>)> {
    let mut kinds = Vec::new();
    let mut args = Vec::new();
    let mut agg_columns = Vec::new();

    for (index, item) in select.projection.iter().enumerate() {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            _ => continue,
        };
        let func = match expr {
            Expr::Function(func) => func,
            _ => continue,
        };
        let name = func.name.0.last()?.value.clone();
        let kind = match AggregateKind::from_name(&name) {
            Some(AggregateKind::Count) if has_wildcard_arg(&func.args) => AggregateKind::CountStar,
            Some(kind) => kind,
            None => continue,
        };
        kinds.push(kind);
        args.push(index);
        agg_columns.push(ColumnDef::new(
            alias.unwrap_or_else(|| name.to_lowercase()),
            kind.result_type(),
        ));
    }

    if kinds.is_empty() {
        return None;
    }

    let grouped = matches!(&select.group_by, GroupByExpr::Expressions(exprs, _) if !exprs.is_empty());
    let mut columns = Vec::new();
    let group_by = if grouped {
        // the group key is the first result column
        columns.push(result.columns.first()?.clone());
        Some(0)
    } else {
        None
    };
    columns.extend(agg_columns);

    Some((Aggregator::new(kinds, args, group_by), columns))
}

fn has_wildcard_arg(args: &FunctionArguments) -> bool {
    match args {
        FunctionArguments::List(list) => list
            .args
            .iter()
            .any(|arg| matches!(arg, FunctionArg::Unnamed(FunctionArgExpr::Wildcard))),
        _ => false,
    }
}

fn insert_rows(source: Option<&Query>) -> Result<Vec<Vec<Option<String>>>> {
    let query = source.ok_or_else(|| VireoError::NotSupported("INSERT without VALUES".into()))?;
    match query.body.as_ref() {
        SetExpr::Values(values) => values
            .rows
            .iter()
            .map(|row| row.iter().map(eval_literal).collect())
            .collect(),
        _ => Err(VireoError::NotSupported("INSERT ... SELECT".into())),
    }
}

/// Evaluate a literal VALUES expression to its text encoding.
fn eval_literal(expr: &Expr) -> Result<Option<String>> {
    match expr {
        Expr::Value(Value::Null) => Ok(None),
        Expr::Value(Value::Number(n, _)) => Ok(Some(n.clone())),
        Expr::Value(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Expr::Value(Value::DoubleQuotedString(s)) => Ok(Some(s.clone())),
        Expr::Value(Value::Boolean(b)) => Ok(Some(if *b { "t" } else { "f" }.to_string())),
        Expr::Value(Value::Placeholder(p)) => {
            Err(VireoError::NotSupported(format!("unbound parameter {}", p)))
        }
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match eval_literal(expr)? {
            Some(n) => Ok(Some(format!("-{}", n))),
            None => Ok(None),
        },
        other => Err(VireoError::NotSupported(format!(
            "expression in VALUES: {}",
            other
        ))),
    }
}

fn eval_unsigned(expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Value(Value::Number(n, _)) => n.parse().ok(),
        _ => None,
    }
}

/// Substitute `$1`, `$2`, … with bound values, in reverse order so `$1`
/// never matches inside `$10`.
pub(crate) fn substitute_parameters(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let replacement = match param {
            Some(value) => {
                let escaped = value.replace('\'', "''");
                if value.parse::<i64>().is_ok() || value.parse::<f64>().is_ok() {
                    escaped
                } else {
                    format!("'{}'", escaped)
                }
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &replacement);
    }
    result
}

async fn serialize_canned(conn: &mut Connection, canned: &CannedResult) -> Result<()> {
    if canned.columns.is_empty() {
        return complete(conn, canned.command_tag.as_deref().unwrap_or("OK")).await;
    }
    let fields = canned
        .columns
        .iter()
        .map(|c| FieldDescription::new(&c.name, types::oid_of(&c.type_name), types::size_of(&c.type_name)))
        .collect();
    conn.send(BackendMessage::RowDescription { fields }).await?;
    for row in &canned.rows {
        conn.send(BackendMessage::DataRow {
            values: row
                .iter()
                .map(|v| v.as_ref().map(|s| s.clone().into_bytes()))
                .collect(),
        })
        .await?;
    }
    let tag = canned
        .command_tag
        .clone()
        .unwrap_or_else(|| format!("SELECT {}", canned.rows.len()));
    complete(conn, &tag).await
}

/// DROP DATABASE is handled textually so DDL routing does not depend on
/// the parser's coverage of database objects.
async fn dispatch_database_ddl(
    backend: &dyn QueryExecutor,
    sql: &str,
) -> Result<Option<String>> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    let Some(rest_upper) = upper.strip_prefix("DROP DATABASE") else {
        return Ok(None);
    };
    if !rest_upper.starts_with(' ') {
        return Ok(None);
    }

    let mut rest = trimmed["DROP DATABASE".len()..].trim();
    let if_exists = rest_upper.trim().starts_with("IF EXISTS ");
    if if_exists {
        rest = rest["IF EXISTS".len()..].trim();
    }
    let name = rest.trim_matches('"');
    if name.is_empty() {
        return Err(VireoError::Parser("DROP DATABASE requires a name".into()));
    }
    backend.drop_database(name, if_exists).await?;
    Ok(Some("DROP DATABASE".to_string()))
}

async fn complete(conn: &mut Connection, tag: &str) -> Result<()> {
    conn.send(BackendMessage::CommandComplete {
        tag: tag.to_string(),
    })
    .await
}

fn object_name_str(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .unwrap_or_default()
}

fn statement_verb(stmt: &Statement) -> String {
    stmt.to_string()
        .split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frontend::StartupMessage;
    use crate::testing::{read_frame, MemoryBackend};
    use tokio::io::DuplexStream;

    fn connection_pair() -> (Connection, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut parameters = std::collections::BTreeMap::new();
        parameters.insert("user".to_string(), "alice".to_string());
        let conn = Connection::new(
            Box::new(server),
            1,
            StartupMessage {
                version_major: 3,
                version_minor: 0,
                parameters,
            },
        );
        (conn, client)
    }

    #[tokio::test]
    async fn test_select_one_scenario() {
        let backend = MemoryBackend::new();
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "SELECT 1;").await.unwrap();
        conn.flush().await.unwrap();

        // RowDescription: one field named ?column? typed int4
        let (tag, body) = read_frame(&mut client).await;
        assert_eq!(tag, b'T');
        assert_eq!(i16::from_be_bytes([body[0], body[1]]), 1);
        assert!(body[2..].starts_with(b"?column?\0"));
        let oid_offset = 2 + "?column?".len() + 1 + 4 + 2;
        let oid = i32::from_be_bytes([
            body[oid_offset],
            body[oid_offset + 1],
            body[oid_offset + 2],
            body[oid_offset + 3],
        ]);
        assert_eq!(oid, 23);

        // DataRow with value "1" (byte 0x31)
        let (tag, body) = read_frame(&mut client).await;
        assert_eq!(tag, b'D');
        assert_eq!(body, vec![0, 1, 0, 0, 0, 1, 0x31]);

        // CommandComplete "SELECT 1"
        let (tag, body) = read_frame(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(body, b"SELECT 1\0");
    }

    #[tokio::test]
    async fn test_empty_query_response() {
        let backend = MemoryBackend::new();
        let (mut conn, mut client) = connection_pair();
        handle_query(&mut conn, &backend, "   ;  ").await.unwrap();
        conn.flush().await.unwrap();
        let (tag, _) = read_frame(&mut client).await;
        assert_eq!(tag, b'I');
    }

    #[tokio::test]
    async fn test_insert_update_delete_tags() {
        let backend =
            MemoryBackend::new().with_table("t", &[("a", "int4"), ("b", "text")], vec![]);
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')")
            .await
            .unwrap();
        conn.flush().await.unwrap();
        let (tag, body) = read_frame(&mut client).await;
        assert_eq!(tag, b'C');
        assert_eq!(body, b"INSERT 0 2\0");

        handle_query(&mut conn, &backend, "DELETE FROM t WHERE a = 1")
            .await
            .unwrap();
        conn.flush().await.unwrap();
        let (_, body) = read_frame(&mut client).await;
        assert_eq!(body, b"DELETE 1\0");
    }

    #[tokio::test]
    async fn test_select_with_limit_and_offset() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("a", "int4")],
            vec![
                vec![Some("1".to_string())],
                vec![Some("2".to_string())],
                vec![Some("3".to_string())],
                vec![Some("4".to_string())],
            ],
        );
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "SELECT a FROM t LIMIT 2 OFFSET 1")
            .await
            .unwrap();
        conn.flush().await.unwrap();

        let frames = read_until_tag(&mut client, b'C').await;
        let data_rows: Vec<&(u8, Vec<u8>)> = frames.iter().filter(|(t, _)| *t == b'D').collect();
        assert_eq!(data_rows.len(), 2);
        assert_eq!(data_rows[0].1[6], b'2');
        assert_eq!(data_rows[1].1[6], b'3');
        assert_eq!(frames.last().unwrap().1, b"SELECT 2\0");
    }

    #[tokio::test]
    async fn test_aggregate_select() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("v", "int4")],
            vec![
                vec![Some("1".to_string())],
                vec![Some("2".to_string())],
                vec![Some("6".to_string())],
            ],
        );
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "SELECT SUM(v), COUNT(*) FROM t")
            .await
            .unwrap();
        conn.flush().await.unwrap();

        let frames = read_until_tag(&mut client, b'C').await;
        let data: Vec<&(u8, Vec<u8>)> = frames.iter().filter(|(t, _)| *t == b'D').collect();
        assert_eq!(data.len(), 1);
        let body = &data[0].1;
        // two columns: "9" then "3"
        assert_eq!(i16::from_be_bytes([body[0], body[1]]), 2);
        assert_eq!(body[6], b'9');
        assert_eq!(body[11], b'3');
        assert_eq!(frames.last().unwrap().1, b"SELECT 1\0");
    }

    #[tokio::test]
    async fn test_group_by_aggregate() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("city", "text"), ("v", "int4")],
            vec![
                vec![Some("b".to_string()), Some("2".to_string())],
                vec![Some("a".to_string()), Some("1".to_string())],
                vec![Some("b".to_string()), Some("3".to_string())],
            ],
        );
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "SELECT city, SUM(v) FROM t GROUP BY city")
            .await
            .unwrap();
        conn.flush().await.unwrap();

        let frames = read_until_tag(&mut client, b'C').await;
        let data: Vec<&(u8, Vec<u8>)> = frames.iter().filter(|(t, _)| *t == b'D').collect();
        assert_eq!(data.len(), 2);
        // stable sort on the group key: "a" before "b"
        assert_eq!(data[0].1[6], b'a');
        assert_eq!(data[1].1[6], b'b');
    }

    #[tokio::test]
    async fn test_transaction_block_and_failure() {
        let backend = MemoryBackend::new();
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "BEGIN").await.unwrap();
        conn.flush().await.unwrap();
        let (_, body) = read_frame(&mut client).await;
        assert_eq!(body, b"BEGIN\0");
        assert_eq!(conn.transaction_status(), b'T');

        // re-entrant BEGIN fails
        let err = handle_query(&mut conn, &backend, "BEGIN").await.unwrap_err();
        assert!(matches!(err, VireoError::TransactionBlocked));

        // a failed statement poisons the block (the loop marks it)
        conn.fail_transaction();
        let err = handle_query(&mut conn, &backend, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, VireoError::TransactionAborted));

        handle_query(&mut conn, &backend, "ROLLBACK").await.unwrap();
        conn.flush().await.unwrap();
        assert_eq!(conn.transaction_status(), b'I');
    }

    #[tokio::test]
    async fn test_truncate_and_vacuum() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("a", "int4")],
            vec![vec![Some("1".to_string())]],
        );
        let (mut conn, mut client) = connection_pair();

        handle_query(&mut conn, &backend, "TRUNCATE TABLE t").await.unwrap();
        conn.flush().await.unwrap();
        let (_, body) = read_frame(&mut client).await;
        assert_eq!(body, b"TRUNCATE\0");
        assert_eq!(backend.row_count("t"), 0);

        handle_query(&mut conn, &backend, "VACUUM").await.unwrap();
        conn.flush().await.unwrap();
        let (_, body) = read_frame(&mut client).await;
        assert_eq!(body, b"VACUUM\0");
    }

    #[tokio::test]
    async fn test_parser_error_surfaces() {
        let backend = MemoryBackend::new();
        let (mut conn, _client) = connection_pair();
        let err = handle_query(&mut conn, &backend, "SELEC 1").await.unwrap_err();
        assert!(matches!(err, VireoError::Parser(_)));
    }

    #[test]
    fn test_substitute_parameters_reverse_order() {
        let sql = "SELECT * FROM t WHERE a = $1 AND b = $10 AND c = $2";
        let mut params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        params[1] = Some("o'brien".to_string());
        let result = substitute_parameters(sql, &params);
        assert_eq!(
            result,
            "SELECT * FROM t WHERE a = 1 AND b = 10 AND c = 'o''brien'"
        );

        let with_null = substitute_parameters("VALUES ($1, $2)", &[Some("5".into()), None]);
        assert_eq!(with_null, "VALUES (5, NULL)");
    }

    async fn read_until_tag(
        client: &mut DuplexStream,
        stop: u8,
    ) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            let frame = read_frame(client).await;
            let done = frame.0 == stop;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }
}
