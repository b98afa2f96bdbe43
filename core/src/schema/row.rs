use std::fmt::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::table::Key;

use super::keycodec::encode_key_prefix;
use super::{Schema, Value};

/// A row under construction. Tracks which columns have been set.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRow {
    schema: Arc<Schema>,
    values: Vec<Option<Value>>,
}

impl PartialRow {
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.column_count()];
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Set a column. The value must match the column type; key columns
    /// cannot be set to null.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let value = value.into();
        let idx = self
            .schema
            .index_of(name)
            .ok_or_else(|| Error::schema(format!("unknown column '{}'", name)))?;
        let column = self.schema.column(idx);
        if !value.fits(column.column_type) {
            return Err(Error::schema(format!(
                "column '{}' expects {}, got {}",
                name, column.column_type, value
            )));
        }
        if column.is_key && value.is_null() {
            return Err(Error::schema(format!("key column '{}' cannot be null", name)));
        }
        self.values[idx] = Some(value);
        Ok(self)
    }

    pub fn set_null(&mut self, name: &str) -> Result<&mut Self> {
        self.set(name, Value::Null)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .index_of(name)
            .and_then(|idx| self.values[idx].as_ref())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Encode the full primary key. Every key column must be set.
    pub fn encode_key(&self) -> Result<Key> {
        let key_count = self.schema.key_count();
        let mut key_values = Vec::with_capacity(key_count);
        for idx in 0..key_count {
            match &self.values[idx] {
                Some(value) => key_values.push(value),
                None => {
                    return Err(Error::schema(format!(
                        "key column '{}' is not set",
                        self.schema.column(idx).name
                    )));
                }
            }
        }
        encode_key_prefix(&self.schema, &key_values)
    }

    /// Encode the set key columns as a key prefix, for scan bounds.
    ///
    /// Only key columns may be set, and they must form a contiguous prefix
    /// of the primary key.
    pub fn encode_key_prefix(&self) -> Result<Key> {
        let key_count = self.schema.key_count();
        if let Some(idx) = (key_count..self.values.len()).find(|&i| self.values[i].is_some()) {
            return Err(Error::schema(format!(
                "non-key column '{}' cannot be part of a key bound",
                self.schema.column(idx).name
            )));
        }
        let prefix_len = self.values[..key_count]
            .iter()
            .take_while(|v| v.is_some())
            .count();
        if self.values[prefix_len..key_count].iter().any(Option::is_some) {
            return Err(Error::schema("key bound columns must form a prefix of the primary key"));
        }
        let key_values: Vec<&Value> = self.values[..prefix_len].iter().flatten().collect();
        encode_key_prefix(&self.schema, &key_values)
    }

    /// Human readable primary key, e.g. `(id="3")`.
    pub fn key_string(&self) -> String {
        let mut out = String::from("(");
        for idx in 0..self.schema.key_count() {
            if idx > 0 {
                out.push_str(", ");
            }
            let value = self.values[idx].as_ref().unwrap_or(&Value::Null);
            let _ = write!(out, "{}={}", self.schema.column(idx).name, value);
        }
        out.push(')');
        out
    }

    /// Full-width row; unset columns become null.
    pub fn to_row(&self) -> Row {
        Row {
            schema: Arc::clone(&self.schema),
            values: self.values.iter().map(|v| v.clone().unwrap_or(Value::Null)).collect(),
        }
    }

    /// Overlay the set non-key columns onto `existing`.
    pub fn merge_into(&self, existing: &Row) -> Row {
        let key_count = self.schema.key_count();
        let mut values = existing.values.clone();
        for (idx, value) in self.values.iter().enumerate().skip(key_count) {
            if let Some(value) = value {
                values[idx] = value.clone();
            }
        }
        Row {
            schema: Arc::clone(&self.schema),
            values,
        }
    }
}

/// A stored row, one value per schema column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Row {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, idx: usize) -> &Value {
        &self.values[idx]
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|idx| &self.values[idx])
    }
}
