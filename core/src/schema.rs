//! Table schema: column types, column descriptors and the primary key.
//!
//! Primary-key columns always come first. They are non-nullable and immutable
//! once a row has been written; non-key columns are nullable.

pub mod keycodec;
pub mod row;
pub mod value;

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

pub use row::{PartialRow, Row};
pub use value::Value;

/// Supported column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Binary,
    /// Microseconds since the unix epoch
    Timestamp,
}

impl ColumnType {
    /// Whether values of this type can be part of a primary key.
    pub fn is_valid_key(&self) -> bool {
        !matches!(
            self,
            ColumnType::Bool | ColumnType::Float32 | ColumnType::Float64
        )
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Bool => "bool",
            ColumnType::Int8 => "int8",
            ColumnType::Int16 => "int16",
            ColumnType::Int32 => "int32",
            ColumnType::Int64 => "int64",
            ColumnType::Float32 => "float",
            ColumnType::Float64 => "double",
            ColumnType::String => "string",
            ColumnType::Binary => "binary",
            ColumnType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// Describes a single column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub is_key: bool,
}

impl ColumnSchema {
    pub fn new(name: &str, column_type: ColumnType, is_key: bool) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            is_key,
        }
    }

    pub fn key(name: &str, column_type: ColumnType) -> Self {
        Self::new(name, column_type, true)
    }

    pub fn value(name: &str, column_type: ColumnType) -> Self {
        Self::new(name, column_type, false)
    }
}

/// Validated, immutable table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    key_count: usize,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Validate a column list and build a schema.
    ///
    /// Fails when names repeat, when there is no key column, when a key
    /// column follows a non-key column, or when a key column has a type that
    /// cannot be ordered as a key.
    pub fn new(columns: Vec<ColumnSchema>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(columns.len());
        let mut key_count = 0;
        let mut seen_value_column = false;

        for (idx, column) in columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(Error::schema(format!("column {} has an empty name", idx)));
            }
            if by_name.insert(column.name.clone(), idx).is_some() {
                return Err(Error::schema(format!("duplicate column name '{}'", column.name)));
            }
            if column.is_key {
                if seen_value_column {
                    return Err(Error::schema(format!(
                        "key column '{}' must precede all non-key columns",
                        column.name
                    )));
                }
                if !column.column_type.is_valid_key() {
                    return Err(Error::schema(format!(
                        "key column '{}' cannot have type {}",
                        column.name, column.column_type
                    )));
                }
                key_count += 1;
            } else {
                seen_value_column = true;
            }
        }

        if key_count == 0 {
            return Err(Error::schema("schema must have at least one key column"));
        }

        Ok(Self {
            columns,
            key_count,
            by_name,
        })
    }

    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &ColumnSchema {
        &self.columns[idx]
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of leading primary-key columns.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.key_count]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn column_by_name(&self, name: &str) -> Option<&ColumnSchema> {
        self.index_of(name).map(|idx| &self.columns[idx])
    }
}

/// Chained construction of a schema, validated by `build`.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    columns: Vec<ColumnSchema>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key_column(&mut self, name: &str, column_type: ColumnType) -> &mut Self {
        self.columns.push(ColumnSchema::key(name, column_type));
        self
    }

    pub fn add_column(&mut self, name: &str, column_type: ColumnType) -> &mut Self {
        self.columns.push(ColumnSchema::value(name, column_type));
        self
    }

    pub fn build(&self) -> Result<Schema> {
        Schema::new(self.columns.clone())
    }
}
