//! Extended-query protocol
//!
//! Parse / Bind / Describe / Execute / Close against the connection's
//! prepared-statement and portal tables. Clients parse once and execute
//! many times with bound parameters; ReadyForQuery is only emitted on
//! Sync, which the request loop handles.

use crate::catalog;
use crate::connection::Connection;
use crate::executor::QueryExecutor;
use crate::handler::simple;
use crate::protocol::backend::BackendMessage;
use crate::protocol::frontend::{BindParameter, TargetKind};
use sqlparser::ast::{SetExpr, Statement, TableFactor};
use tracing::debug;
use vireo_common::Result;

pub(crate) async fn handle_parse(
    conn: &mut Connection,
    name: &str,
    sql: &str,
    param_oids: Vec<i32>,
) -> Result<()> {
    conn.set_prepared_statement(name, sql, param_oids)?;
    conn.send(BackendMessage::ParseComplete).await?;
    conn.flush().await?;
    Ok(())
}

pub(crate) async fn handle_bind(
    conn: &mut Connection,
    portal: &str,
    statement: &str,
    parameters: Vec<BindParameter>,
    result_formats: Vec<i16>,
) -> Result<()> {
    conn.bind_portal(portal, statement, parameters, result_formats)?;
    conn.send(BackendMessage::BindComplete).await?;
    conn.flush().await?;
    Ok(())
}

/// Describe a statement (`'S'`) or portal (`'P'`).
///
/// For statements the reply is ParameterDescription then NoData; SELECT
/// column types are resolved through the `information_schema.columns`
/// path against the backend schema so later Executes serialize with the
/// right OIDs.
pub(crate) async fn handle_describe(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    kind: TargetKind,
    name: &str,
) -> Result<()> {
    match kind {
        TargetKind::Statement => {
            let statement = conn.prepared_statement(name)?;
            let oids = statement.param_oids.clone();

            if let Some(table) = statement.statement.as_ref().and_then(select_table) {
                match catalog::table_columns(backend, &table).await {
                    Ok(columns) => {
                        debug!(table = %table, columns = columns.len(), "resolved statement columns")
                    }
                    Err(e) => debug!(table = %table, "column resolution failed: {}", e),
                }
            }

            conn.send(BackendMessage::ParameterDescription { oids })
                .await?;
            conn.send(BackendMessage::NoData).await?;
        }
        TargetKind::Portal => {
            conn.portal(name)?;
            conn.send(BackendMessage::NoData).await?;
        }
    }
    conn.flush().await?;
    Ok(())
}

/// Execute a bound portal through the simple-query serializer, honoring
/// `max_rows` when non-zero.
pub(crate) async fn handle_execute(
    conn: &mut Connection,
    backend: &dyn QueryExecutor,
    portal_name: &str,
    max_rows: i32,
) -> Result<()> {
    let portal = conn.portal(portal_name)?.clone();

    let statement = match &portal.statement.statement {
        Some(statement) => statement.clone(),
        None => {
            conn.send(BackendMessage::EmptyQueryResponse).await?;
            conn.flush().await?;
            return Ok(());
        }
    };

    let statement = if portal.parameters.is_empty() {
        statement
    } else {
        // rebuild the statement with bound values substituted
        let params: Vec<Option<String>> = portal
            .parameters
            .iter()
            .map(|p| p.text_value())
            .collect();
        let sql = simple::substitute_parameters(&portal.statement.sql, &params);
        let mut statements = simple::parse_sql(&sql)?;
        match statements.pop() {
            Some(statement) => statement,
            None => {
                conn.send(BackendMessage::EmptyQueryResponse).await?;
                conn.flush().await?;
                return Ok(());
            }
        }
    };

    let max_rows = if max_rows > 0 { max_rows as usize } else { 0 };
    simple::execute_statement(conn, backend, &statement, max_rows, &portal.result_formats).await?;
    conn.flush().await?;
    Ok(())
}

/// Close a statement or portal. Missing names are not an error per the
/// protocol; the reply is CloseComplete either way.
pub(crate) async fn handle_close(
    conn: &mut Connection,
    kind: TargetKind,
    name: &str,
) -> Result<()> {
    let removed = match kind {
        TargetKind::Statement => conn.remove_prepared_statement(name),
        TargetKind::Portal => conn.remove_portal(name),
    };
    if removed.is_err() {
        debug!(name = %name, "close of unknown target ignored");
    }
    conn.send(BackendMessage::CloseComplete).await?;
    conn.flush().await?;
    Ok(())
}

/// First plain table of a SELECT, if the statement is one.
fn select_table(statement: &Statement) -> Option<String> {
    let query = match statement {
        Statement::Query(query) => query,
        _ => return None,
    };
    let select = match query.body.as_ref() {
        SetExpr::Select(select) => select,
        _ => return None,
    };
    select.from.first().and_then(|twj| match &twj.relation {
        TableFactor::Table { name, .. } => {
            name.0.last().map(|ident| ident.value.clone())
        }
        _ => None,
    })
}
