//! Main request loop
//!
//! Runs after startup succeeds: peek the next tag, decode, dispatch,
//! answer. Messages for one connection are handled strictly in arrival
//! order; responses for message *k* are fully written before *k+1* runs.
//! An error in the extended flow skips everything until the next Sync.

use crate::connection::Connection;
use crate::executor::QueryExecutor;
use crate::handler::{extended, simple};
use crate::protocol::backend::BackendMessage;
use crate::protocol::constants::*;
use crate::protocol::frontend::FrontendMessage;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};
use vireo_common::{Result, VireoError};

/// Run the request loop until Terminate, shutdown, or an I/O error.
pub async fn run_request_loop(
    conn: &mut Connection,
    backend: &Arc<dyn QueryExecutor>,
) -> Result<()> {
    let mut ignore_till_sync = false;

    loop {
        // A failed read here means the client went away between messages.
        let tag = match conn.peek_tag().await {
            Ok(tag) => tag,
            Err(_) => {
                debug!(conn_id = conn.conn_id, "client disconnected");
                return Ok(());
            }
        };

        let span = tracing::debug_span!(
            "pg_message",
            tag = %(tag as char),
            conn_id = conn.conn_id
        );

        let (tag, body) = conn.read_message().await?;

        if ignore_till_sync && tag != TAG_SYNC && tag != TAG_TERMINATE {
            debug!(tag = %(tag as char), "skip-till-sync");
            continue;
        }

        let message = match FrontendMessage::decode(tag, &body) {
            Ok(message) => message,
            Err(err) => {
                warn!(tag = %(tag as char), "undecodable message: {}", err);
                conn.send(BackendMessage::from_error(&err)).await?;
                conn.flush().await?;
                continue;
            }
        };

        match message {
            FrontendMessage::Terminate => {
                debug!(conn_id = conn.conn_id, "client sent Terminate");
                return Ok(());
            }

            // ----- simple protocol -----
            FrontendMessage::Query { sql } => {
                let result = simple::handle_query(conn, backend.as_ref(), &sql)
                    .instrument(span)
                    .await;
                report_simple(conn, result).await?;
                conn.send(BackendMessage::ReadyForQuery {
                    status: conn.transaction_status(),
                })
                .await?;
                conn.flush().await?;
            }

            // ----- extended protocol -----
            FrontendMessage::Parse {
                name,
                sql,
                param_oids,
            } => {
                let result = extended::handle_parse(conn, &name, &sql, param_oids)
                    .instrument(span)
                    .await;
                ignore_till_sync |= report_extended(conn, result).await?;
            }
            FrontendMessage::Bind {
                portal,
                statement,
                parameters,
                result_formats,
            } => {
                let result =
                    extended::handle_bind(conn, &portal, &statement, parameters, result_formats)
                        .instrument(span)
                        .await;
                ignore_till_sync |= report_extended(conn, result).await?;
            }
            FrontendMessage::Describe { kind, name } => {
                let result = extended::handle_describe(conn, backend.as_ref(), kind, &name)
                    .instrument(span)
                    .await;
                ignore_till_sync |= report_extended(conn, result).await?;
            }
            FrontendMessage::Execute { portal, max_rows } => {
                let result = extended::handle_execute(conn, backend.as_ref(), &portal, max_rows)
                    .instrument(span)
                    .await;
                ignore_till_sync |= report_extended(conn, result).await?;
            }
            FrontendMessage::Close { kind, name } => {
                let result = extended::handle_close(conn, kind, &name)
                    .instrument(span)
                    .await;
                ignore_till_sync |= report_extended(conn, result).await?;
            }
            FrontendMessage::Sync => {
                if ignore_till_sync {
                    debug!("error recovery complete, resuming");
                    ignore_till_sync = false;
                }
                conn.send(BackendMessage::ReadyForQuery {
                    status: conn.transaction_status(),
                })
                .await?;
                conn.flush().await?;
            }
            FrontendMessage::Flush => {
                conn.flush().await?;
            }

            // COPY frames arrive here only outside a COPY operation
            FrontendMessage::CopyData { .. }
            | FrontendMessage::CopyDone
            | FrontendMessage::CopyFail { .. } => {
                let err = VireoError::NotSupported("COPY message outside a COPY operation".into());
                conn.send(BackendMessage::from_error(&err)).await?;
                conn.flush().await?;
            }
            FrontendMessage::Password { .. } => {
                let err =
                    VireoError::InvalidMessage("unexpected password message after startup".into());
                conn.send(BackendMessage::from_error(&err)).await?;
                conn.flush().await?;
            }
        }
    }
}

/// Surface a simple-protocol error: fatal errors tear the connection down,
/// everything else becomes one ErrorResponse and fails an open block.
async fn report_simple(conn: &mut Connection, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            conn.fail_transaction();
            conn.send(BackendMessage::from_error(&err)).await?;
            Ok(())
        }
    }
}

/// Surface an extended-protocol error; returns whether skip-till-Sync
/// recovery begins.
async fn report_extended(conn: &mut Connection, result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(false),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            conn.fail_transaction();
            conn.send(BackendMessage::from_error(&err)).await?;
            conn.flush().await?;
            Ok(true)
        }
    }
}
