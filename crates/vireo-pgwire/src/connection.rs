//! Per-connection state
//!
//! A [`Connection`] owns its socket halves, identity, startup snapshot,
//! prepared-statement and portal tables, and transaction state. It is owned
//! exclusively by its request-loop task; nothing else mutates it. Statement
//! and portal names are namespaced per connection, so lookups on another
//! connection always miss.

use crate::codec::MessageReader;
use crate::protocol::constants::*;
use crate::protocol::frontend::{BindParameter, StartupMessage};
use chrono::{DateTime, Utc};
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::debug;
use uuid::Uuid;
use vireo_common::{Result, VireoError};

use crate::protocol::backend::BackendMessage;

/// Marker trait for the stream a connection runs over (plain TCP, TLS, or
/// an in-memory duplex in tests).
pub trait ClientStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> ClientStream for T {}

/// The socket after SSL negotiation, type-erased
pub type BoxedSocket = Box<dyn ClientStream>;

/// Transaction state of one connection.
///
/// Modeled as an enum rather than a lock so the failed state is
/// representable: a failed statement inside a BEGIN block answers
/// `ReadyForQuery('E')` until ROLLBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    InBlock,
    Failed,
}

/// A parsed SQL template bound to a name on this connection
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub name: String,
    pub sql: String,
    pub param_oids: Vec<i32>,
    /// `None` when the query text was empty
    pub statement: Option<Statement>,
}

/// A prepared statement with parameters bound and result formats chosen
#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    pub statement_name: String,
    pub statement: PreparedStatement,
    pub parameters: Vec<BindParameter>,
    pub result_formats: Vec<i16>,
}

impl Portal {
    /// Look up the parameter for a `$N` placeholder (1-indexed).
    pub fn find_bind_param(&self, placeholder: &str) -> Option<&BindParameter> {
        let n: usize = placeholder.strip_prefix('$')?.parse().ok()?;
        if n == 0 {
            return None;
        }
        self.parameters.get(n - 1)
    }
}

/// One client connection and everything scoped to it
pub struct Connection {
    /// Stable identity
    pub id: Uuid,
    /// Numeric connection id assigned by the listener
    pub conn_id: u64,
    pub created_at: DateTime<Utc>,
    /// Snapshot of the startup message
    pub startup: StartupMessage,
    pub user: String,
    pub database: String,
    pub search_path: String,
    /// Whether the socket was upgraded to TLS
    pub tls: bool,
    /// DER bytes of the client certificate, when one was presented
    pub client_cert: Option<Vec<u8>>,
    /// Secret for a future CancelRequest, sent in BackendKeyData
    pub secret_key: i32,

    reader: MessageReader<ReadHalf<BoxedSocket>>,
    writer: WriteHalf<BoxedSocket>,
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
    tx: TxState,
}

impl Connection {
    pub fn new(socket: BoxedSocket, conn_id: u64, startup: StartupMessage) -> Self {
        let user = startup.user().unwrap_or("").to_string();
        let database = startup.database().unwrap_or(&user).to_string();
        let (read_half, write_half) = tokio::io::split(socket);
        Self {
            id: Uuid::new_v4(),
            conn_id,
            created_at: Utc::now(),
            startup,
            user,
            database,
            search_path: "public".to_string(),
            tls: false,
            client_cert: None,
            secret_key: 0,
            reader: MessageReader::new(read_half),
            writer: write_half,
            statements: HashMap::new(),
            portals: HashMap::new(),
            tx: TxState::Idle,
        }
    }

    // ----- socket I/O -----

    /// Peek the next message tag without consuming it.
    pub async fn peek_tag(&mut self) -> Result<u8> {
        self.reader.peek_u8().await
    }

    /// Read one framed message: tag, length, body.
    pub async fn read_message(&mut self) -> Result<(u8, Vec<u8>)> {
        let tag = self.reader.read_u8().await?;
        let len = self.reader.read_i32().await?;
        if len < 4 {
            return Err(VireoError::ShortMessage {
                expected: 4,
                actual: len.max(0) as usize,
            });
        }
        let body = self.reader.read_exact(len as usize - 4).await?;
        Ok((tag, body))
    }

    /// Encode and write one backend message.
    pub async fn send(&mut self, msg: BackendMessage) -> Result<()> {
        self.writer.write_all(&msg.encode()).await?;
        Ok(())
    }

    /// Write raw bytes (used for the single-byte SSL answer).
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }

    // ----- prepared statements -----

    /// Parse and store a prepared statement. The unnamed statement (empty
    /// string) may be overwritten; re-setting a named statement errors.
    pub fn set_prepared_statement(
        &mut self,
        name: &str,
        sql: &str,
        param_oids: Vec<i32>,
    ) -> Result<()> {
        if !name.is_empty() && self.statements.contains_key(name) {
            return Err(VireoError::PreparedStatementExist(name.to_string()));
        }

        let statement = if sql.trim().is_empty() {
            None
        } else {
            let mut parsed = Parser::parse_sql(&PostgreSqlDialect {}, sql)
                .map_err(|e| VireoError::Parser(e.to_string()))?;
            if parsed.len() > 1 {
                return Err(VireoError::MultipleStatements);
            }
            parsed.pop()
        };

        debug!(name = %name, "storing prepared statement");
        self.statements.insert(
            name.to_string(),
            PreparedStatement {
                name: name.to_string(),
                sql: sql.to_string(),
                param_oids,
                statement,
            },
        );
        Ok(())
    }

    pub fn prepared_statement(&self, name: &str) -> Result<&PreparedStatement> {
        self.statements
            .get(name)
            .ok_or_else(|| VireoError::PreparedStatementNotExist(name.to_string()))
    }

    pub fn remove_prepared_statement(&mut self, name: &str) -> Result<()> {
        self.statements
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VireoError::PreparedStatementNotExist(name.to_string()))
    }

    // ----- portals -----

    /// Bind a statement to a portal. Portals overwrite silently; the
    /// statement is snapshotted so closing it later does not invalidate
    /// the portal.
    pub fn bind_portal(
        &mut self,
        portal: &str,
        statement: &str,
        parameters: Vec<BindParameter>,
        result_formats: Vec<i16>,
    ) -> Result<()> {
        let stmt = self.prepared_statement(statement)?.clone();
        self.portals.insert(
            portal.to_string(),
            Portal {
                name: portal.to_string(),
                statement_name: statement.to_string(),
                statement: stmt,
                parameters,
                result_formats,
            },
        );
        Ok(())
    }

    pub fn portal(&self, name: &str) -> Result<&Portal> {
        self.portals
            .get(name)
            .ok_or_else(|| VireoError::PortalNotExist(name.to_string()))
    }

    pub fn remove_portal(&mut self, name: &str) -> Result<()> {
        self.portals
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| VireoError::PortalNotExist(name.to_string()))
    }

    // ----- transaction state -----

    /// Enter a transaction block; fails on a re-entered BEGIN.
    pub fn lock_transaction(&mut self) -> Result<()> {
        match self.tx {
            TxState::Idle => {
                self.tx = TxState::InBlock;
                Ok(())
            }
            TxState::InBlock | TxState::Failed => Err(VireoError::TransactionBlocked),
        }
    }

    /// Leave the transaction block (COMMIT / ROLLBACK).
    pub fn unlock_transaction(&mut self) {
        self.tx = TxState::Idle;
    }

    /// Mark the current block failed; no-op outside a block.
    pub fn fail_transaction(&mut self) {
        if self.tx == TxState::InBlock {
            self.tx = TxState::Failed;
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.tx != TxState::Idle
    }

    pub fn tx_state(&self) -> TxState {
        self.tx
    }

    /// Status byte for ReadyForQuery.
    pub fn transaction_status(&self) -> u8 {
        match self.tx {
            TxState::Idle => TRANSACTION_STATUS_IDLE,
            TxState::InBlock => TRANSACTION_STATUS_IN_BLOCK,
            TxState::Failed => TRANSACTION_STATUS_FAILED,
        }
    }
}
