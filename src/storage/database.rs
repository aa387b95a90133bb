// In-memory database
// Owns every table and executes parsed statements against them.
// This is the engine behind the `Database` trait for the shell and tests.

use super::parser::{CompareOp, Operand, ParsedStatement, Predicate, Select, Statement, StatementParser};
use super::{table::Table, DataType, MemoryCursor, Row, Schema, Value};
use crate::error::{DaoError, DaoResult};
use crate::session::{Cursor, Database};
use anyhow::{anyhow, bail, Result};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Result of executing one statement
#[derive(Debug)]
pub enum ExecResult {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    /// DDL or DML; `count` is the number of rows touched
    Changed { message: String, count: usize },
}

/// Where a statement's placeholders go
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterLayout {
    pub count: usize,
    /// Slot feeding `LIMIT ?`, if any
    pub limit_position: Option<usize>,
    /// Slot feeding `OFFSET ?`, if any
    pub offset_position: Option<usize>,
}

struct TransactionLevel {
    snapshot: HashMap<String, Table>,
    successful: bool,
    child_failed: bool,
}

/// Thread-safe in-memory relational database
#[derive(Default)]
pub struct MemoryDatabase {
    /// Tables keyed by lower-cased name
    tables: RwLock<HashMap<String, Table>>,
    transactions: Mutex<Vec<TransactionLevel>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and execute one statement with the given parameter slots
    pub fn execute(&self, sql: &str, params: &[Option<String>]) -> Result<ExecResult> {
        let ParsedStatement {
            statement,
            parameter_count,
        } = StatementParser::parse(sql)?;

        if params.len() != parameter_count {
            bail!(
                "Statement expects {} parameter(s) but {} were bound",
                parameter_count,
                params.len()
            );
        }
        tracing::debug!(sql, ?params, "executing statement");

        match statement {
            Statement::CreateTable {
                name,
                schema,
                if_not_exists,
            } => {
                let mut tables = self.tables.write();
                let key = name.to_ascii_lowercase();
                if tables.contains_key(&key) {
                    if if_not_exists {
                        return Ok(changed(format!("Table '{}' already exists", name), 0));
                    }
                    bail!("Table '{}' already exists", name);
                }
                tables.insert(key, Table::new(name.clone(), schema));
                Ok(changed(format!("Table '{}' created", name), 0))
            }

            Statement::DropTable { name, if_exists } => {
                let mut tables = self.tables.write();
                match tables.remove(&name.to_ascii_lowercase()) {
                    Some(_) => Ok(changed(format!("Table '{}' dropped", name), 0)),
                    None if if_exists => Ok(changed(format!("Table '{}' does not exist", name), 0)),
                    None => bail!("Table '{}' not found", name),
                }
            }

            Statement::Insert {
                table_name,
                columns,
                rows,
            } => {
                let mut tables = self.tables.write();
                let table = table_mut(&mut tables, &table_name)?;

                // Validate every row before touching the table so a failing
                // multi-row insert leaves it unchanged
                let mut staged = table.clone();
                for operands in &rows {
                    let values = operands
                        .iter()
                        .map(|operand| resolve(operand, &DataType::Text, params))
                        .collect::<Result<Vec<_>>>()?;
                    staged.insert_columns(&columns, values)?;
                }
                *table = staged;

                Ok(changed(
                    format!("{} row(s) inserted into '{}'", rows.len(), table_name),
                    rows.len(),
                ))
            }

            Statement::Select(select) => {
                let tables = self.tables.read();
                let (columns, rows) = run_select(&tables, &select, params)?;
                Ok(ExecResult::Rows { columns, rows })
            }

            Statement::Delete { table_name, filter } => {
                let mut tables = self.tables.write();
                let table = table_mut(&mut tables, &table_name)?;
                let schema = table.get_schema().clone();
                let count = table.delete(|row| match &filter {
                    Some(predicate) => evaluate(predicate, &schema, row, params),
                    None => Ok(true),
                })?;
                Ok(changed(
                    format!("{} row(s) deleted from '{}'", count, table_name),
                    count,
                ))
            }
        }
    }

    /// Report the placeholder count and which slots feed LIMIT/OFFSET
    pub fn describe_parameters(sql: &str) -> Result<ParameterLayout> {
        let parsed = StatementParser::parse(sql)?;
        let position = |operand: &Option<Operand>| match operand {
            Some(Operand::Parameter(index)) => Some(*index),
            _ => None,
        };
        let (limit_position, offset_position) = match &parsed.statement {
            Statement::Select(select) => (position(&select.limit), position(&select.offset)),
            _ => (None, None),
        };
        Ok(ParameterLayout {
            count: parsed.parameter_count,
            limit_position,
            offset_position,
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().values().map(|t| t.name.clone()).collect();
        names.sort();
        names
    }

    pub fn row_count(&self, table_name: &str) -> Option<usize> {
        self.tables
            .read()
            .get(&table_name.to_ascii_lowercase())
            .map(Table::row_count)
    }

    /// Depth of the currently open transaction nesting
    pub fn transaction_depth(&self) -> usize {
        self.transactions.lock().len()
    }
}

impl Database for MemoryDatabase {
    fn raw_query(&self, sql: &str, params: &[Option<String>]) -> DaoResult<Box<dyn Cursor>> {
        match self.execute(sql, params)? {
            ExecResult::Rows { columns, rows } => {
                tracing::trace!(rows = rows.len(), "cursor opened");
                Ok(Box::new(MemoryCursor::new(columns, rows)))
            }
            ExecResult::Changed { .. } => Err(DaoError::Execution(anyhow!(
                "Statement does not return rows: {}",
                sql
            ))),
        }
    }

    fn exec_sql(&self, sql: &str) -> DaoResult<()> {
        self.execute(sql, &[])?;
        Ok(())
    }

    fn begin_transaction(&self) -> DaoResult<()> {
        let mut transactions = self.transactions.lock();
        let snapshot = self.tables.read().clone();
        transactions.push(TransactionLevel {
            snapshot,
            successful: false,
            child_failed: false,
        });
        tracing::trace!(depth = transactions.len(), "transaction begun");
        Ok(())
    }

    fn set_transaction_successful(&self) -> DaoResult<()> {
        let mut transactions = self.transactions.lock();
        let level = transactions
            .last_mut()
            .ok_or_else(|| DaoError::IllegalState("No transaction in progress".to_string()))?;
        level.successful = true;
        Ok(())
    }

    fn end_transaction(&self) -> DaoResult<()> {
        let mut transactions = self.transactions.lock();
        let level = transactions
            .pop()
            .ok_or_else(|| DaoError::IllegalState("No transaction in progress".to_string()))?;

        if !level.successful || level.child_failed {
            *self.tables.write() = level.snapshot;
            // A failed nested level fails the whole transaction
            if let Some(parent) = transactions.last_mut() {
                parent.child_failed = true;
            }
            tracing::debug!(depth = transactions.len() + 1, "transaction rolled back");
        }
        Ok(())
    }
}

fn changed(message: String, count: usize) -> ExecResult {
    ExecResult::Changed { message, count }
}

fn table_mut<'a>(tables: &'a mut HashMap<String, Table>, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(&name.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("Table '{}' not found", name))
}

fn run_select(
    tables: &HashMap<String, Table>,
    select: &Select,
    params: &[Option<String>],
) -> Result<(Vec<String>, Vec<Row>)> {
    let table = tables
        .get(&select.table_name.to_ascii_lowercase())
        .ok_or_else(|| anyhow!("Table '{}' not found", select.table_name))?;
    let schema = table.get_schema();

    let mut rows = table.scan(|row| match &select.filter {
        Some(predicate) => evaluate(predicate, schema, row, params),
        None => Ok(true),
    })?;

    let offset = match &select.offset {
        Some(operand) => resolve_count(operand, params, "OFFSET")?.max(0) as usize,
        None => 0,
    };
    // A negative limit means no limit
    let limit = match &select.limit {
        Some(operand) => usize::try_from(resolve_count(operand, params, "LIMIT")?).ok(),
        None => None,
    };
    rows = rows
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();

    match &select.projection {
        None => Ok((schema.column_names(), rows)),
        Some(names) => {
            let indexes = names
                .iter()
                .map(|name| {
                    schema
                        .get_column_index(name)
                        .ok_or_else(|| anyhow!("Column not found: {}", name))
                })
                .collect::<Result<Vec<_>>>()?;
            let projected = rows
                .into_iter()
                .map(|row| Row {
                    values: indexes.iter().map(|&i| row.values[i].clone()).collect(),
                })
                .collect();
            let columns = indexes
                .iter()
                .map(|&i| schema.columns[i].name.clone())
                .collect();
            Ok((columns, projected))
        }
    }
}

/// Evaluate a WHERE predicate against one row. NULL never satisfies a comparison.
fn evaluate(
    predicate: &Predicate,
    schema: &Schema,
    row: &Row,
    params: &[Option<String>],
) -> Result<bool> {
    match predicate {
        Predicate::And(left, right) => {
            Ok(evaluate(left, schema, row, params)? && evaluate(right, schema, row, params)?)
        }
        Predicate::Or(left, right) => {
            Ok(evaluate(left, schema, row, params)? || evaluate(right, schema, row, params)?)
        }
        Predicate::IsNull { column, negated } => {
            let index = column_index(schema, column)?;
            Ok(row.values[index].is_null() != *negated)
        }
        Predicate::Compare {
            column,
            op,
            operand,
        } => {
            let index = column_index(schema, column)?;
            let left = &row.values[index];
            let right = resolve(operand, &schema.columns[index].data_type, params)?;
            if left.is_null() || right.is_null() {
                return Ok(false);
            }
            let ordering = match left.compare(&right) {
                Some(ordering) => ordering,
                None => return Ok(false),
            };
            Ok(match op {
                CompareOp::Eq => ordering == Ordering::Equal,
                CompareOp::NotEq => ordering != Ordering::Equal,
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::LtEq => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::GtEq => ordering != Ordering::Less,
            })
        }
    }
}

fn column_index(schema: &Schema, column: &str) -> Result<usize> {
    schema
        .get_column_index(column)
        .ok_or_else(|| anyhow!("Column not found: {}", column))
}

/// Turn an operand into a value under the affinity of `data_type`
fn resolve(operand: &Operand, data_type: &DataType, params: &[Option<String>]) -> Result<Value> {
    match operand {
        Operand::Literal(value) => Ok(value.clone().coerce_to(data_type)),
        Operand::Parameter(index) => match params.get(*index) {
            Some(Some(text)) => Ok(Value::from_parameter(text, data_type)),
            Some(None) => Ok(Value::Null),
            None => Err(anyhow!("Parameter {} is not bound", index)),
        },
    }
}

fn resolve_count(operand: &Operand, params: &[Option<String>], clause: &str) -> Result<i64> {
    match resolve(operand, &DataType::Integer, params)? {
        Value::Integer(n) => Ok(n),
        other => Err(anyhow!("{} must be an integer, got '{}'", clause, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users() -> MemoryDatabase {
        let db = MemoryDatabase::new();
        db.exec_sql("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();
        db.exec_sql(
            "INSERT INTO users VALUES (1, 'Alice', 30), (2, 'Bob', 25), (3, 'Carol', NULL), (4, 'Dan', 41)",
        )
        .unwrap();
        db
    }

    fn ids(db: &MemoryDatabase, sql: &str, params: &[Option<String>]) -> Vec<i64> {
        match db.execute(sql, params).unwrap() {
            ExecResult::Rows { rows, .. } => rows
                .into_iter()
                .map(|r| match r.values[0] {
                    Value::Integer(i) => i,
                    ref other => panic!("unexpected id {:?}", other),
                })
                .collect(),
            other => panic!("expected rows, got {:?}", other),
        }
    }

    fn p(text: &str) -> Option<String> {
        Some(text.to_string())
    }

    #[test]
    fn test_parameters_use_column_affinity() {
        let db = db_with_users();
        assert_eq!(ids(&db, "SELECT * FROM users WHERE id = ?", &[p("2")]), vec![2]);
        assert_eq!(ids(&db, "SELECT * FROM users WHERE age >= ?", &[p("30")]), vec![1, 4]);
        assert_eq!(ids(&db, "SELECT * FROM users WHERE name = ?", &[p("Carol")]), vec![3]);
    }

    #[test]
    fn test_null_binding_matches_nothing() {
        let db = db_with_users();
        assert!(ids(&db, "SELECT * FROM users WHERE age = ?", &[None]).is_empty());
        assert_eq!(ids(&db, "SELECT * FROM users WHERE age IS NULL", &[]), vec![3]);
    }

    #[test]
    fn test_limit_and_offset_slots() {
        let db = db_with_users();
        let sql = "SELECT * FROM users WHERE id > ? LIMIT ? OFFSET ?";
        assert_eq!(ids(&db, sql, &[p("0"), p("2"), p("1")]), vec![2, 3]);
        assert_eq!(ids(&db, sql, &[p("0"), p("-1"), p("3")]), vec![4]);
        assert!(db.execute(sql, &[p("0"), p("ten"), p("0")]).is_err());
    }

    #[test]
    fn test_offset_written_before_limit() {
        let db = db_with_users();
        assert_eq!(ids(&db, "SELECT * FROM users LIMIT 1, 10", &[]), vec![2, 3, 4]);
        assert_eq!(
            ids(&db, "SELECT * FROM users LIMIT ?, ?", &[p("1"), p("2")]),
            vec![2, 3]
        );
        assert_eq!(
            ids(&db, "SELECT * FROM users OFFSET ? LIMIT ?", &[p("1"), p("2")]),
            vec![2, 3]
        );

        let layout =
            MemoryDatabase::describe_parameters("SELECT * FROM t WHERE a = ? LIMIT ?, ?").unwrap();
        assert_eq!(
            layout,
            ParameterLayout {
                count: 3,
                limit_position: Some(2),
                offset_position: Some(1),
            }
        );
        let layout =
            MemoryDatabase::describe_parameters("SELECT * FROM t OFFSET ? LIMIT ?").unwrap();
        assert_eq!(layout.offset_position, Some(0));
        assert_eq!(layout.limit_position, Some(1));
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let db = db_with_users();
        assert!(db.execute("SELECT * FROM users WHERE id = ?", &[]).is_err());
    }

    #[test]
    fn test_describe_parameters() {
        let layout =
            MemoryDatabase::describe_parameters("SELECT * FROM t WHERE a = ? LIMIT ? OFFSET ?")
                .unwrap();
        assert_eq!(
            layout,
            ParameterLayout {
                count: 3,
                limit_position: Some(1),
                offset_position: Some(2),
            }
        );
    }

    #[test]
    fn test_projection() {
        let db = db_with_users();
        match db.execute("SELECT name FROM users WHERE id = 1", &[]).unwrap() {
            ExecResult::Rows { columns, rows } => {
                assert_eq!(columns, vec!["name".to_string()]);
                assert_eq!(rows[0].values, vec![Value::Text("Alice".into())]);
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_multi_row_insert_is_atomic() {
        let db = db_with_users();
        assert!(db
            .exec_sql("INSERT INTO users VALUES (10, 'X', 1), (1, 'Dup', 2)")
            .is_err());
        assert_eq!(db.row_count("users"), Some(4));
    }

    #[test]
    fn test_delete_with_filter() {
        let db = db_with_users();
        match db.execute("DELETE FROM users WHERE age < ?", &[p("35")]).unwrap() {
            ExecResult::Changed { count, .. } => assert_eq!(count, 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(db.row_count("USERS"), Some(2));
    }

    #[test]
    fn test_transaction_rollback() {
        let db = db_with_users();
        db.begin_transaction().unwrap();
        db.exec_sql("DELETE FROM users").unwrap();
        db.end_transaction().unwrap();
        assert_eq!(db.row_count("users"), Some(4));

        db.begin_transaction().unwrap();
        db.exec_sql("DELETE FROM users WHERE id = 1").unwrap();
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();
        assert_eq!(db.row_count("users"), Some(3));
    }

    #[test]
    fn test_failed_nested_transaction_rolls_back_outer() {
        let db = db_with_users();
        db.begin_transaction().unwrap();
        db.exec_sql("DELETE FROM users WHERE id = 1").unwrap();
        db.begin_transaction().unwrap();
        db.exec_sql("DELETE FROM users WHERE id = 2").unwrap();
        db.end_transaction().unwrap();
        db.set_transaction_successful().unwrap();
        db.end_transaction().unwrap();
        assert_eq!(db.row_count("users"), Some(4));
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_end_without_begin_is_illegal() {
        let db = MemoryDatabase::new();
        assert!(matches!(db.end_transaction(), Err(DaoError::IllegalState(_))));
    }

    #[test]
    fn test_raw_query_rejects_non_select() {
        let db = db_with_users();
        assert!(db.raw_query("DELETE FROM users", &[]).is_err());
    }
}
