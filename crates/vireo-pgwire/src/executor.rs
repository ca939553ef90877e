//! Pluggable query executor interface
//!
//! The framework parses SQL and drives the protocol; storage is supplied by
//! an implementation of [`QueryExecutor`]. The executor is shared read-only
//! across connections and is responsible for its own synchronization.

use async_trait::async_trait;
use sqlparser::ast::{Expr, Query, Statement};
use vireo_common::Result;

/// One column of a result set or table schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Schema type name; resolved to an OID through the type registry
    pub type_name: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

/// A materialized result set. Values are text-encoded; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Schema of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Position of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// Storage backend contract.
///
/// DDL statements arrive as the parsed AST so the backend can inspect
/// whatever clauses it supports; DML row counts feed the CommandComplete
/// tags (`INSERT 0 n`, `UPDATE n`, `DELETE n`).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Enter a transaction block.
    async fn begin(&self) -> Result<()>;

    /// Commit the current transaction block.
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction block.
    async fn rollback(&self) -> Result<()>;

    async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<()>;

    async fn drop_database(&self, name: &str, if_exists: bool) -> Result<()>;

    async fn create_table(&self, stmt: &Statement) -> Result<()>;

    async fn alter_table(&self, stmt: &Statement) -> Result<()>;

    async fn drop_table(&self, name: &str, if_exists: bool) -> Result<()>;

    async fn create_index(&self, stmt: &Statement) -> Result<()>;

    async fn drop_index(&self, name: &str, if_exists: bool) -> Result<()>;

    /// Insert fully-evaluated rows; returns the number of rows inserted.
    /// An empty `columns` slice targets the full schema column list.
    async fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64>;

    /// Returns the number of rows updated.
    async fn update(&self, stmt: &Statement) -> Result<u64>;

    /// Returns the number of rows deleted. `None` selection deletes all.
    async fn delete(&self, table: &str, selection: Option<&Expr>) -> Result<u64>;

    /// Evaluate a SELECT. Aggregate selectors project their argument
    /// column; aggregation itself is applied by the dispatcher.
    async fn query(&self, query: &Query) -> Result<ResultSet>;

    /// Schema lookup, used by COPY column validation and Describe.
    async fn table_schema(&self, table: &str) -> Result<TableSchema>;
}
