use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DbKitError, Result};
use crate::types::{names_match, FromValue, Value};

/// A single row in dictionary form.
/// Values are accessed by column name, ignoring case.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    /// Creates a new Record from column names and values in the same order.
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| names_match(c, column))
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Result<&Value> {
        self.position(column)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| DbKitError::ColumnNotFound(column.to_string()))
    }

    /// Gets a value by column name and converts it.
    pub fn get_as<T: FromValue>(&self, column: &str) -> Result<T> {
        let value = self.get(column)?.clone();
        let found = value.type_name();
        T::from_value(value).ok_or_else(|| DbKitError::TypeMismatch {
            column: column.to_string(),
            expected: T::type_name(),
            found,
        })
    }

    /// Returns all column names in this record, in query order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns the number of columns in this record.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this record has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Converts into a plain map keyed by column name.
    pub fn into_map(self) -> HashMap<String, Value> {
        self.columns.iter().cloned().zip(self.values).collect()
    }
}
