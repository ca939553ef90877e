//! Test support: an in-memory storage backend and wire-frame helpers
//!
//! The backend implements just enough of [`QueryExecutor`] to exercise the
//! protocol paths; it guards its table map with a mutex since the executor
//! is shared across connection tasks.

use crate::executor::{ColumnDef, QueryExecutor, ResultSet, TableSchema};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlparser::ast::{
    Assignment, AssignmentTarget, Expr, Query, Select, SelectItem, SetExpr, Statement,
    TableFactor, Value,
};
use std::collections::{BTreeMap, BTreeSet};
use tokio::io::{AsyncRead, AsyncReadExt};
use vireo_common::{Result, VireoError};

struct MemTable {
    schema: TableSchema,
    rows: Vec<Vec<Option<String>>>,
}

/// In-memory tables keyed by name
pub(crate) struct MemoryBackend {
    tables: Mutex<BTreeMap<String, MemTable>>,
    databases: Mutex<BTreeSet<String>>,
}

impl MemoryBackend {
    pub(crate) fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            databases: Mutex::new(BTreeSet::new()),
        }
    }

    pub(crate) fn with_table(
        self,
        name: &str,
        columns: &[(&str, &str)],
        rows: Vec<Vec<Option<String>>>,
    ) -> Self {
        {
            let mut tables = self.tables.lock();
            tables.insert(
                name.to_string(),
                MemTable {
                    schema: TableSchema {
                        name: name.to_string(),
                        columns: columns
                            .iter()
                            .map(|(n, t)| ColumnDef::new(*n, *t))
                            .collect(),
                    },
                    rows,
                },
            );
        }
        self
    }

    pub(crate) fn row_count(&self, table: &str) -> usize {
        self.tables.lock().get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub(crate) fn rows(&self, table: &str) -> Vec<Vec<Option<String>>> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn not_exist(table: &str) -> VireoError {
        VireoError::NotExist(format!("relation \"{}\"", table))
    }
}

/// `column = literal` filter; anything else matches every row.
fn row_matches(selection: Option<&Expr>, schema: &TableSchema, row: &[Option<String>]) -> bool {
    let expr = match selection {
        Some(expr) => expr,
        None => return true,
    };
    if let Expr::BinaryOp { left, op, right } = expr {
        if matches!(op, sqlparser::ast::BinaryOperator::Eq) {
            if let Expr::Identifier(ident) = left.as_ref() {
                if let Some(index) = schema.column_index(&ident.value) {
                    let literal = match right.as_ref() {
                        Expr::Value(Value::Number(n, _)) => Some(n.clone()),
                        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
                        _ => None,
                    };
                    return row.get(index).map(|v| *v == literal).unwrap_or(false);
                }
            }
        }
    }
    true
}

fn literal_value(expr: &Expr) -> Result<(Option<String>, &'static str)> {
    match expr {
        Expr::Value(Value::Number(n, _)) => Ok((
            Some(n.clone()),
            if n.contains('.') { "float8" } else { "int4" },
        )),
        Expr::Value(Value::SingleQuotedString(s)) => Ok((Some(s.clone()), "text")),
        Expr::Value(Value::Boolean(b)) => {
            Ok((Some(if *b { "t" } else { "f" }.to_string()), "bool"))
        }
        Expr::Value(Value::Null) => Ok((None, "text")),
        other => Err(VireoError::NotSupported(format!(
            "literal expression: {}",
            other
        ))),
    }
}

fn assignment_value(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Value(Value::Number(n, _)) => Some(n.clone()),
        Expr::Value(Value::SingleQuotedString(s)) => Some(s.clone()),
        _ => None,
    }
}

fn select_table_name(select: &Select) -> Option<String> {
    select.from.first().and_then(|twj| match &twj.relation {
        TableFactor::Table { name, .. } => name.0.last().map(|i| i.value.clone()),
        _ => None,
    })
}

#[async_trait]
impl QueryExecutor for MemoryBackend {
    async fn begin(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        Ok(())
    }

    async fn create_database(&self, name: &str, if_not_exists: bool) -> Result<()> {
        let mut databases = self.databases.lock();
        if databases.contains(name) && !if_not_exists {
            return Err(VireoError::AlreadyExists(format!("database \"{}\"", name)));
        }
        databases.insert(name.to_string());
        Ok(())
    }

    async fn drop_database(&self, name: &str, if_exists: bool) -> Result<()> {
        let mut databases = self.databases.lock();
        if !databases.remove(name) && !if_exists {
            return Err(VireoError::NotExist(format!("database \"{}\"", name)));
        }
        Ok(())
    }

    async fn create_table(&self, stmt: &Statement) -> Result<()> {
        let create = match stmt {
            Statement::CreateTable(create) => create,
            _ => return Err(VireoError::InvalidMessage("expected CREATE TABLE".into())),
        };
        let name = create
            .name
            .0
            .last()
            .map(|i| i.value.clone())
            .unwrap_or_default();
        let mut tables = self.tables.lock();
        if tables.contains_key(&name) {
            if create.if_not_exists {
                return Ok(());
            }
            return Err(VireoError::AlreadyExists(format!("relation \"{}\"", name)));
        }
        tables.insert(
            name.clone(),
            MemTable {
                schema: TableSchema {
                    name,
                    columns: create
                        .columns
                        .iter()
                        .map(|c| {
                            ColumnDef::new(
                                c.name.value.clone(),
                                c.data_type.to_string().to_lowercase(),
                            )
                        })
                        .collect(),
                },
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn alter_table(&self, _stmt: &Statement) -> Result<()> {
        Ok(())
    }

    async fn drop_table(&self, name: &str, if_exists: bool) -> Result<()> {
        let mut tables = self.tables.lock();
        if tables.remove(name).is_none() && !if_exists {
            return Err(Self::not_exist(name));
        }
        Ok(())
    }

    async fn create_index(&self, _stmt: &Statement) -> Result<()> {
        Ok(())
    }

    async fn drop_index(&self, _name: &str, _if_exists: bool) -> Result<()> {
        Ok(())
    }

    async fn insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Option<String>>],
    ) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mem = tables.get_mut(table).ok_or_else(|| Self::not_exist(table))?;

        let targets: Vec<usize> = if columns.is_empty() {
            (0..mem.schema.columns.len()).collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    mem.schema.column_index(name).ok_or_else(|| {
                        VireoError::NotExist(format!(
                            "column \"{}\" of relation \"{}\"",
                            name, table
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut inserted = 0;
        for row in rows {
            if row.len() != targets.len() {
                return Err(VireoError::ColumnsNotEqual {
                    expected: targets.len(),
                    actual: row.len(),
                });
            }
            let mut full = vec![None; mem.schema.columns.len()];
            for (value, index) in row.iter().zip(&targets) {
                full[*index] = value.clone();
            }
            mem.rows.push(full);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, stmt: &Statement) -> Result<u64> {
        let (table, assignments, selection) = match stmt {
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => (table, assignments, selection),
            _ => return Err(VireoError::InvalidMessage("expected UPDATE".into())),
        };
        let name = match &table.relation {
            TableFactor::Table { name, .. } => {
                name.0.last().map(|i| i.value.clone()).unwrap_or_default()
            }
            _ => return Err(VireoError::NotSupported("UPDATE of a non-table".into())),
        };

        let mut tables = self.tables.lock();
        let mem = tables.get_mut(&name).ok_or_else(|| Self::not_exist(&name))?;

        let mut updates: Vec<(usize, Option<String>)> = Vec::new();
        for Assignment { target, value } in assignments {
            let column = match target {
                AssignmentTarget::ColumnName(name) => {
                    name.0.last().map(|i| i.value.clone()).unwrap_or_default()
                }
                _ => continue,
            };
            if let Some(index) = mem.schema.column_index(&column) {
                updates.push((index, assignment_value(value)));
            }
        }

        let schema = mem.schema.clone();
        let mut count = 0;
        for row in mem.rows.iter_mut() {
            if row_matches(selection.as_ref(), &schema, row) {
                for (index, value) in &updates {
                    row[*index] = value.clone();
                }
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&self, table: &str, selection: Option<&Expr>) -> Result<u64> {
        let mut tables = self.tables.lock();
        let mem = tables.get_mut(table).ok_or_else(|| Self::not_exist(table))?;
        let schema = mem.schema.clone();
        let before = mem.rows.len();
        mem.rows.retain(|row| !row_matches(selection, &schema, row));
        Ok((before - mem.rows.len()) as u64)
    }

    async fn query(&self, query: &Query) -> Result<ResultSet> {
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            _ => return Err(VireoError::NotSupported("non-SELECT query body".into())),
        };

        // literal projection without a FROM list
        if select.from.is_empty() {
            let mut columns = Vec::new();
            let mut row = Vec::new();
            for item in &select.projection {
                let (expr, alias) = match item {
                    SelectItem::UnnamedExpr(expr) => (expr, None),
                    SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
                    _ => continue,
                };
                let (value, type_name) = literal_value(expr)?;
                columns.push(ColumnDef::new(
                    alias.unwrap_or_else(|| "?column?".to_string()),
                    type_name,
                ));
                row.push(value);
            }
            return Ok(ResultSet {
                columns,
                rows: vec![row],
            });
        }

        let table = select_table_name(select)
            .ok_or_else(|| VireoError::NotSupported("SELECT without a plain table".into()))?;
        let tables = self.tables.lock();
        let mem = tables.get(&table).ok_or_else(|| Self::not_exist(&table))?;

        let filtered: Vec<&Vec<Option<String>>> = mem
            .rows
            .iter()
            .filter(|row| row_matches(select.selection.as_ref(), &mem.schema, row))
            .collect();

        // one output column per projection selector, in order
        let mut columns = Vec::new();
        let mut indexes = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) => {
                    for (i, c) in mem.schema.columns.iter().enumerate() {
                        columns.push(c.clone());
                        indexes.push(i);
                    }
                }
                SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                    let index = mem.schema.column_index(&ident.value).ok_or_else(|| {
                        VireoError::NotExist(format!("column \"{}\"", ident.value))
                    })?;
                    columns.push(mem.schema.columns[index].clone());
                    indexes.push(index);
                }
                SelectItem::ExprWithAlias {
                    expr: Expr::Identifier(ident),
                    alias,
                } => {
                    let index = mem.schema.column_index(&ident.value).ok_or_else(|| {
                        VireoError::NotExist(format!("column \"{}\"", ident.value))
                    })?;
                    columns.push(ColumnDef::new(
                        alias.value.clone(),
                        mem.schema.columns[index].type_name.clone(),
                    ));
                    indexes.push(index);
                }
                SelectItem::UnnamedExpr(Expr::Function(func)) => {
                    // aggregate selectors project their argument column;
                    // the dispatcher applies the aggregation
                    let name = func
                        .name
                        .0
                        .last()
                        .map(|i| i.value.to_lowercase())
                        .unwrap_or_default();
                    let index = function_arg_index(func, &mem.schema).unwrap_or(0);
                    columns.push(ColumnDef::new(
                        name,
                        mem.schema
                            .columns
                            .get(index)
                            .map(|c| c.type_name.clone())
                            .unwrap_or_else(|| "int4".to_string()),
                    ));
                    indexes.push(index);
                }
                other => {
                    return Err(VireoError::NotSupported(format!(
                        "projection item: {}",
                        other
                    )))
                }
            }
        }

        let rows = filtered
            .into_iter()
            .map(|row| indexes.iter().map(|i| row.get(*i).cloned().flatten()).collect())
            .collect();

        Ok(ResultSet { columns, rows })
    }

    async fn table_schema(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.schema.clone())
            .ok_or_else(|| Self::not_exist(table))
    }
}

fn function_arg_index(
    func: &sqlparser::ast::Function,
    schema: &TableSchema,
) -> Option<usize> {
    use sqlparser::ast::{FunctionArg, FunctionArgExpr, FunctionArguments};
    let list = match &func.args {
        FunctionArguments::List(list) => list,
        _ => return None,
    };
    for arg in &list.args {
        if let FunctionArg::Unnamed(FunctionArgExpr::Expr(Expr::Identifier(ident))) = arg {
            return schema.column_index(&ident.value);
        }
    }
    None
}

/// Read one framed backend message from a test client stream.
pub(crate) async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> (u8, Vec<u8>) {
    let mut tag = [0u8; 1];
    stream.read_exact(&mut tag).await.expect("read tag");
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read length");
    let len = i32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.expect("read body");
    (tag[0], body)
}

/// Read frames until (and including) ReadyForQuery.
pub(crate) async fn read_until_ready<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    loop {
        let frame = read_frame(stream).await;
        let done = frame.0 == b'Z';
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn parse_query(sql: &str) -> Query {
        match Parser::parse_sql(&PostgreSqlDialect {}, sql)
            .unwrap()
            .pop()
            .unwrap()
        {
            Statement::Query(q) => *q,
            other => panic!("not a query: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_memory_backend_select_and_filter() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("a", "int4"), ("b", "text")],
            vec![
                vec![Some("1".to_string()), Some("x".to_string())],
                vec![Some("2".to_string()), Some("y".to_string())],
            ],
        );
        let rs = backend
            .query(&parse_query("SELECT b FROM t WHERE a = 2"))
            .await
            .unwrap();
        assert_eq!(rs.rows, vec![vec![Some("y".to_string())]]);

        let rs = backend.query(&parse_query("SELECT * FROM t")).await.unwrap();
        assert_eq!(rs.columns.len(), 2);
        assert_eq!(rs.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_backend_update() {
        let backend = MemoryBackend::new().with_table(
            "t",
            &[("a", "int4")],
            vec![vec![Some("1".to_string())], vec![Some("2".to_string())]],
        );
        let stmt = Parser::parse_sql(&PostgreSqlDialect {}, "UPDATE t SET a = 9 WHERE a = 1")
            .unwrap()
            .pop()
            .unwrap();
        let count = backend.update(&stmt).await.unwrap();
        assert_eq!(count, 1);
        assert_eq!(backend.rows("t")[0][0], Some("9".to_string()));
    }
}
