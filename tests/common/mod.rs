// Shared test doubles: a Database that records every statement it runs and
// serves canned rows, and an entity mapper that counts decodes.
#![allow(dead_code)]

use parking_lot::Mutex;
use rustydao::{Cursor, DaoContext, DaoError, DaoResult, Database, EntityMapper, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One call to `raw_query`
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

pub struct RecordingDatabase {
    columns: Vec<String>,
    rows: Mutex<Vec<Vec<Value>>>,
    executions: Mutex<Vec<Execution>>,
    close_calls: Arc<AtomicUsize>,
    opened: AtomicUsize,
    fail: AtomicBool,
}

impl RecordingDatabase {
    pub fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: vec!["id".to_string(), "name".to_string()],
            rows: Mutex::new(rows),
            executions: Mutex::new(Vec::new()),
            close_calls: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Rows of (id, name) users
    pub fn with_users(users: &[(i64, &str)]) -> Self {
        Self::new(
            users
                .iter()
                .map(|(id, name)| vec![Value::Integer(*id), Value::Text(name.to_string())])
                .collect(),
        )
    }

    pub fn set_rows(&self, rows: Vec<Vec<Value>>) {
        *self.rows.lock() = rows;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().clone()
    }

    pub fn last_params(&self) -> Vec<Option<String>> {
        self.executions
            .lock()
            .last()
            .map(|e| e.params.clone())
            .unwrap_or_default()
    }

    /// Total calls to `Cursor::close`, including repeated ones
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Database for RecordingDatabase {
    fn raw_query(&self, sql: &str, params: &[Option<String>]) -> DaoResult<Box<dyn Cursor>> {
        self.executions.lock().push(Execution {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("database is locked").into());
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingCursor {
            columns: self.columns.clone(),
            rows: self.rows.lock().clone(),
            position: None,
            closed: false,
            close_calls: Arc::clone(&self.close_calls),
        }))
    }

    fn exec_sql(&self, _sql: &str) -> DaoResult<()> {
        Ok(())
    }

    fn begin_transaction(&self) -> DaoResult<()> {
        Ok(())
    }

    fn set_transaction_successful(&self) -> DaoResult<()> {
        Ok(())
    }

    fn end_transaction(&self) -> DaoResult<()> {
        Ok(())
    }
}

struct RecordingCursor {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: Option<usize>,
    closed: bool,
    close_calls: Arc<AtomicUsize>,
}

impl Cursor for RecordingCursor {
    fn count(&self) -> usize {
        self.rows.len()
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn move_to_position(&mut self, position: usize) -> bool {
        if self.closed || position >= self.rows.len() {
            return false;
        }
        self.position = Some(position);
        true
    }

    fn position(&self) -> Option<usize> {
        self.position
    }

    fn value(&self, column: usize) -> Option<&Value> {
        if self.closed {
            return None;
        }
        self.position
            .and_then(|p| self.rows.get(p))
            .and_then(|row| row.get(column))
    }

    fn close(&mut self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: Option<String>,
}

/// Decodes (id, name) rows and counts how often it was asked to.
/// A row named "bad" fails to decode.
#[derive(Default)]
pub struct UserMapper {
    decodes: AtomicUsize,
}

impl UserMapper {
    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }
}

impl EntityMapper for UserMapper {
    type Entity = User;

    fn read_entity(&self, cursor: &dyn Cursor) -> DaoResult<User> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        let id = cursor
            .get_i64(0)?
            .ok_or_else(|| DaoError::Decode("id is NULL".to_string()))?;
        let name = cursor.get_string(1)?;
        if name.as_deref() == Some("bad") {
            return Err(DaoError::Decode(format!("malformed row {}", id)));
        }
        Ok(User { id, name })
    }
}

pub fn context(db: &Arc<RecordingDatabase>) -> Arc<DaoContext> {
    Arc::new(DaoContext::new(db.clone()))
}
