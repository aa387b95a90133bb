// Cursor over a materialized SELECT result

use super::{Row, Value};
use crate::session::Cursor;

/// A snapshot of the rows a SELECT produced.
/// The row count is fixed when the cursor is created.
#[derive(Debug)]
pub struct MemoryCursor {
    columns: Vec<String>,
    rows: Vec<Row>,
    position: Option<usize>,
    closed: bool,
}

impl MemoryCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            position: None,
            closed: false,
        }
    }
}

impl Cursor for MemoryCursor {
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
            .and_then(|row| row.values.get(column))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.position = None;
            self.rows = Vec::new();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
