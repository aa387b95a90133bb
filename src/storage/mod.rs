// Storage module - the embedded in-memory relational engine
// It implements the Database/Cursor interfaces the query runtime consumes

pub mod cursor;
pub mod database;
pub mod parser;
pub mod table;

pub use cursor::MemoryCursor;
pub use database::{MemoryDatabase, ParameterLayout};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single row in a table, one Value per column
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

/// A single column value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    /// Compare two values (used for WHERE clauses)
    /// Integers and floats compare numerically; other mixed types and NULL don't compare
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Interpret a bound parameter's text under the affinity of a column type.
    /// Text that does not parse as the column's type stays text (and so won't match).
    pub fn from_parameter(text: &str, data_type: &DataType) -> Value {
        match data_type {
            DataType::Integer => text
                .trim()
                .parse()
                .map(Value::Integer)
                .unwrap_or_else(|_| Value::Text(text.to_string())),
            DataType::Float => text
                .trim()
                .parse()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(text.to_string())),
            DataType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Value::Boolean(true),
                "false" | "0" => Value::Boolean(false),
                _ => Value::Text(text.to_string()),
            },
            DataType::Text => Value::Text(text.to_string()),
        }
    }

    /// Coerce a literal to a column type on insert (e.g. 1 into a BOOLEAN column)
    pub fn coerce_to(self, data_type: &DataType) -> Value {
        match (self, data_type) {
            (Value::Integer(i), DataType::Float) => Value::Float(i as f64),
            (Value::Integer(i @ (0 | 1)), DataType::Boolean) => Value::Boolean(i == 1),
            (Value::Text(s), DataType::Integer | DataType::Float | DataType::Boolean) => {
                Value::from_parameter(&s, data_type)
            }
            (value, _) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// The structure of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

/// A single column definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub nullable: bool,
}

/// The data types the engine supports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Find the index of a column by name (case-insensitive, like SQL identifiers)
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col.name.eq_ignore_ascii_case(name))
    }

    pub fn get_primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|col| col.primary_key)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_affinity() {
        assert_eq!(Value::from_parameter("42", &DataType::Integer), Value::Integer(42));
        assert_eq!(Value::from_parameter("2.5", &DataType::Float), Value::Float(2.5));
        assert_eq!(Value::from_parameter("1", &DataType::Boolean), Value::Boolean(true));
        assert_eq!(
            Value::from_parameter("abc", &DataType::Integer),
            Value::Text("abc".to_string())
        );
    }

    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Null), None);
        assert_eq!(Value::Text("a".into()).compare(&Value::Integer(1)), None);
    }
}
