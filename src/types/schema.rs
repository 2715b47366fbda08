//! Row shape definitions shared by every operator in a plan

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Row, Value};
use crate::error::{ExecError, Result};

/// Column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Integer
    Integer,
    /// Float
    Float,
    /// Boolean
    Boolean,
    /// Text/String
    Text,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column data type
    pub col_type: ColumnType,
    /// Position in Row (0-indexed)
    pub position: usize,
    /// Whether this column is nullable
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType, position: usize) -> Self {
        Self {
            name: name.into(),
            col_type,
            position,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Row shape: ordered column list produced by an operator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Column definitions (ordered)
    pub columns: Vec<ColumnDef>,
    /// Column name -> position mapping
    #[serde(skip)]
    column_map: HashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Schema {
    /// Create a schema, re-numbering positions in declaration order
    pub fn new(mut columns: Vec<ColumnDef>) -> Self {
        for (i, col) in columns.iter_mut().enumerate() {
            col.position = i;
        }
        let mut schema = Self {
            columns,
            column_map: HashMap::new(),
        };
        schema.rebuild_column_map();
        schema
    }

    /// Shorthand for `(name, type)` pairs, all nullable
    pub fn from_pairs(pairs: &[(&str, ColumnType)]) -> Self {
        Self::new(
            pairs
                .iter()
                .enumerate()
                .map(|(i, (name, ty))| ColumnDef::new(*name, *ty, i))
                .collect(),
        )
    }

    /// Get column by position
    pub fn column(&self, position: usize) -> Option<&ColumnDef> {
        self.columns.get(position)
    }

    /// Get column position by name
    pub fn get_column_position(&self, name: &str) -> Option<usize> {
        self.column_map.get(name).copied()
    }

    /// Get number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Rebuild column map (call after deserialization)
    pub fn rebuild_column_map(&mut self) {
        self.column_map.clear();
        for col in &self.columns {
            self.column_map.insert(col.name.clone(), col.position);
        }
    }

    /// Same arity and column types; names may differ
    pub fn is_compatible(&self, other: &Schema) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(other.columns.iter())
                .all(|(a, b)| a.col_type == b.col_type)
    }

    /// Validate a row against this schema
    pub fn validate_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ExecError::TypeError(format!(
                "Column count mismatch: expected {}, got {}",
                self.columns.len(),
                row.len()
            )));
        }

        for (col, value) in self.columns.iter().zip(row.iter()) {
            let type_match = match (col.col_type, value) {
                (_, Value::Null) => col.nullable,
                (ColumnType::Integer, Value::Integer(_)) => true,
                (ColumnType::Float, Value::Float(_)) => true,
                (ColumnType::Float, Value::Integer(_)) => true,
                (ColumnType::Boolean, Value::Bool(_)) => true,
                (ColumnType::Text, Value::Text(_)) => true,
                _ => false,
            };

            if !type_match {
                return Err(ExecError::TypeError(format!(
                    "Type mismatch for column '{}': expected {:?}, got {:?}",
                    col.name, col.col_type, value
                )));
            }
        }

        Ok(())
    }

    /// Validate `row` and widen integers in FLOAT columns, so that every
    /// value carries the declared column type
    pub fn coerce_row(&self, mut row: Row) -> Result<Row> {
        self.validate_row(&row)?;
        for (col, value) in self.columns.iter().zip(row.iter_mut()) {
            if let (ColumnType::Float, &Value::Integer(i)) = (col.col_type, &*value) {
                *value = Value::Float(i as f64);
            }
        }
        Ok(row)
    }
}
