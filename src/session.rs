// Database session interfaces
// The query runtime talks to a database only through these traits:
// a Database runs SQL and hands out Cursors, an EntityMapper turns the
// cursor's current row into an entity.

use crate::error::{DaoError, DaoResult};
use crate::storage::Value;
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// A live handle into a result set with a known row count.
///
/// A fresh cursor is positioned before the first row. Rows are addressed by
/// index through `move_to_position`, after which `value` reads columns of
/// that row. `close` releases the handle and must be idempotent.
pub trait Cursor: Send {
    /// Number of rows in the result set
    fn count(&self) -> usize;

    fn column_names(&self) -> &[String];

    /// Move to the row at `position`; returns false if there is no such row
    fn move_to_position(&mut self, position: usize) -> bool;

    /// Current row index, None while before the first row
    fn position(&self) -> Option<usize>;

    /// Value of `column` in the current row
    fn value(&self, column: usize) -> Option<&Value>;

    fn close(&mut self);

    fn is_closed(&self) -> bool;

    fn column_index(&self, name: &str) -> DaoResult<usize> {
        self.column_names()
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| DaoError::Decode(format!("No column named '{}'", name)))
    }

    fn current_value(&self, column: usize) -> DaoResult<&Value> {
        self.value(column).ok_or_else(|| {
            DaoError::Decode(format!(
                "Column {} not readable at position {:?}",
                column,
                self.position()
            ))
        })
    }

    fn get_i64(&self, column: usize) -> DaoResult<Option<i64>> {
        match self.current_value(column)? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            Value::Boolean(b) => Ok(Some(i64::from(*b))),
            other => Err(DaoError::Decode(format!("Expected integer, got '{}'", other))),
        }
    }

    fn get_f64(&self, column: usize) -> DaoResult<Option<f64>> {
        match self.current_value(column)? {
            Value::Null => Ok(None),
            Value::Float(f) => Ok(Some(*f)),
            Value::Integer(i) => Ok(Some(*i as f64)),
            other => Err(DaoError::Decode(format!("Expected float, got '{}'", other))),
        }
    }

    fn get_bool(&self, column: usize) -> DaoResult<Option<bool>> {
        match self.current_value(column)? {
            Value::Null => Ok(None),
            Value::Boolean(b) => Ok(Some(*b)),
            Value::Integer(i) => Ok(Some(*i != 0)),
            other => Err(DaoError::Decode(format!("Expected boolean, got '{}'", other))),
        }
    }

    /// Any non-null value in its text form
    fn get_string(&self, column: usize) -> DaoResult<Option<String>> {
        match self.current_value(column)? {
            Value::Null => Ok(None),
            other => Ok(Some(other.to_string())),
        }
    }
}

/// Runs SQL for the query runtime.
///
/// `params` are the query's parameter slots in order; `None` binds NULL.
/// Transactions nest: every `begin_transaction` must be paired with an
/// `end_transaction`, and a level that ends without
/// `set_transaction_successful` is rolled back.
pub trait Database: Send + Sync {
    fn raw_query(&self, sql: &str, params: &[Option<String>]) -> DaoResult<Box<dyn Cursor>>;

    /// Execute a statement that returns no rows
    fn exec_sql(&self, sql: &str) -> DaoResult<()>;

    fn begin_transaction(&self) -> DaoResult<()>;

    fn set_transaction_successful(&self) -> DaoResult<()>;

    fn end_transaction(&self) -> DaoResult<()>;
}

/// Decodes the cursor's current row into an entity
pub trait EntityMapper {
    type Entity;

    fn read_entity(&self, cursor: &dyn Cursor) -> DaoResult<Self::Entity>;
}

/// A generic entity: the column names and values of one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|i| self.values.get(i))
    }
}

/// Maps any row to a `Record`
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordMapper;

impl EntityMapper for RecordMapper {
    type Entity = Record;

    fn read_entity(&self, cursor: &dyn Cursor) -> DaoResult<Record> {
        let columns = cursor.column_names().to_vec();
        let values = (0..columns.len())
            .map(|i| cursor.current_value(i).cloned())
            .collect::<DaoResult<Vec<_>>>()?;
        Ok(Record { columns, values })
    }
}

/// Exclusive owner of a cursor; closes it when dropped
pub struct OwnedCursor(Box<dyn Cursor>);

impl OwnedCursor {
    pub fn new(cursor: Box<dyn Cursor>) -> Self {
        Self(cursor)
    }
}

impl Deref for OwnedCursor {
    type Target = dyn Cursor;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl DerefMut for OwnedCursor {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for OwnedCursor {
    fn drop(&mut self) {
        if !self.0.is_closed() {
            self.0.close();
        }
    }
}
