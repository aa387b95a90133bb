// Table implementation
// A table combines a schema, its rows (in insertion order) and a primary key index

use super::{DataType, Row, Schema, Value};
use anyhow::{anyhow, bail, Result};
use std::collections::BTreeSet;

/// An in-memory table
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub schema: Schema,
    rows: Vec<Row>,
    /// Text form of every primary key value present in `rows`
    primary_keys: BTreeSet<String>,
}

impl Table {
    pub fn new(name: String, schema: Schema) -> Self {
        Self {
            name,
            schema,
            rows: Vec::new(),
            primary_keys: BTreeSet::new(),
        }
    }

    /// Insert a full row (one value per column, in schema order)
    pub fn insert(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.schema.columns.len() {
            bail!(
                "Table '{}' has {} columns but {} values were supplied",
                self.name,
                self.schema.columns.len(),
                values.len()
            );
        }

        let mut checked = Vec::with_capacity(values.len());
        for (column, value) in self.schema.columns.iter().zip(values) {
            let value = value.coerce_to(&column.data_type);
            if value.is_null() {
                if !column.nullable {
                    bail!("NOT NULL constraint failed: {}.{}", self.name, column.name);
                }
            } else if !matches_type(&value, &column.data_type) {
                bail!(
                    "Type mismatch for {}.{}: expected {:?}, got '{}'",
                    self.name,
                    column.name,
                    column.data_type,
                    value
                );
            }
            checked.push(value);
        }

        let primary_key = self
            .schema
            .get_primary_key_index()
            .map(|pk| checked[pk].to_string());
        if let Some(key) = &primary_key {
            if self.primary_keys.contains(key) {
                bail!("Primary key violation: duplicate value {} in '{}'", key, self.name);
            }
        }

        self.rows.push(Row { values: checked });
        if let Some(key) = primary_key {
            self.primary_keys.insert(key);
        }
        Ok(())
    }

    /// Insert values for the named columns; unnamed columns are NULL
    pub fn insert_columns(&mut self, columns: &[String], values: Vec<Value>) -> Result<()> {
        if columns.is_empty() {
            return self.insert(values);
        }
        if columns.len() != values.len() {
            bail!(
                "{} columns named but {} values were supplied",
                columns.len(),
                values.len()
            );
        }

        let mut row = vec![Value::Null; self.schema.columns.len()];
        for (name, value) in columns.iter().zip(values) {
            let index = self
                .schema
                .get_column_index(name)
                .ok_or_else(|| anyhow!("Column not found: {}", name))?;
            row[index] = value;
        }
        self.insert(row)
    }

    /// Return clones of every row the predicate accepts, in insertion order
    pub fn scan<F>(&self, mut predicate: F) -> Result<Vec<Row>>
    where
        F: FnMut(&Row) -> Result<bool>,
    {
        let mut results = Vec::new();
        for row in &self.rows {
            if predicate(row)? {
                results.push(row.clone());
            }
        }
        Ok(results)
    }

    /// Delete every row the predicate accepts, returning how many were removed
    pub fn delete<F>(&mut self, mut predicate: F) -> Result<usize>
    where
        F: FnMut(&Row) -> Result<bool>,
    {
        let mut keep = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            keep.push(!predicate(row)?);
        }

        let before = self.rows.len();
        let mut flags = keep.into_iter();
        self.rows.retain(|_| flags.next().unwrap_or(true));

        if let Some(pk) = self.schema.get_primary_key_index() {
            self.primary_keys = self.rows.iter().map(|r| r.values[pk].to_string()).collect();
        }
        Ok(before - self.rows.len())
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn get_schema(&self) -> &Schema {
        &self.schema
    }
}

fn matches_type(value: &Value, data_type: &DataType) -> bool {
    matches!(
        (value, data_type),
        (Value::Integer(_), DataType::Integer)
            | (Value::Float(_), DataType::Float)
            | (Value::Text(_), DataType::Text)
            | (Value::Boolean(_), DataType::Boolean)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Column;

    fn users() -> Table {
        Table::new(
            "users".to_string(),
            Schema::new(vec![
                Column {
                    name: "id".to_string(),
                    data_type: DataType::Integer,
                    primary_key: true,
                    nullable: false,
                },
                Column {
                    name: "name".to_string(),
                    data_type: DataType::Text,
                    primary_key: false,
                    nullable: true,
                },
            ]),
        )
    }

    #[test]
    fn test_primary_key_violation() {
        let mut table = users();
        table
            .insert(vec![Value::Integer(1), Value::Text("Alice".into())])
            .unwrap();
        let err = table
            .insert(vec![Value::Integer(1), Value::Text("Bob".into())])
            .unwrap_err();
        assert!(err.to_string().contains("Primary key violation"));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_not_null_and_type_checks() {
        let mut table = users();
        assert!(table.insert(vec![Value::Null, Value::Null]).is_err());
        assert!(table
            .insert(vec![Value::Text("x".into()), Value::Null])
            .is_err());
        // numeric text is coerced under the column's affinity
        table
            .insert(vec![Value::Text("7".into()), Value::Null])
            .unwrap();
        let rows = table.scan(|_| Ok(true)).unwrap();
        assert_eq!(rows[0].values[0], Value::Integer(7));
    }

    #[test]
    fn test_insert_named_columns() {
        let mut table = users();
        table
            .insert_columns(&["id".to_string()], vec![Value::Integer(3)])
            .unwrap();
        let rows = table.scan(|_| Ok(true)).unwrap();
        assert_eq!(rows[0].values, vec![Value::Integer(3), Value::Null]);
    }

    #[test]
    fn test_delete_frees_primary_key() {
        let mut table = users();
        table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        table.insert(vec![Value::Integer(2), Value::Null]).unwrap();
        let removed = table
            .delete(|row| Ok(row.values[0] == Value::Integer(1)))
            .unwrap();
        assert_eq!(removed, 1);
        table.insert(vec![Value::Integer(1), Value::Null]).unwrap();
        assert_eq!(table.row_count(), 2);
    }
}
