use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DbKitError, Result};
use crate::traits::RowCursor;
use crate::types::{fold_name, names_match, Value};

/// Which cursor columns a query should keep.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnSelector {
    /// Every column, in schema order.
    #[default]
    All,
    /// Columns at these ordinals, in the given order.
    Ordinals(Vec<usize>),
    /// Columns with these names (case-insensitive), in the given order.
    Names(Vec<String>),
}

/// A [`ColumnSelector`] plus how to treat requested columns the cursor lacks.
///
/// With `ignore_unmatched` unset (the default) a missing name or an
/// out-of-range ordinal is an error; with it set, the column is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnSelection {
    pub selector: ColumnSelector,
    pub ignore_unmatched: bool,
}

impl ColumnSelection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn ordinals(ordinals: impl IntoIterator<Item = usize>) -> Self {
        Self {
            selector: ColumnSelector::Ordinals(ordinals.into_iter().collect()),
            ignore_unmatched: false,
        }
    }

    pub fn names<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            selector: ColumnSelector::Names(names.into_iter().map(Into::into).collect()),
            ignore_unmatched: false,
        }
    }

    pub fn ignore_unmatched(mut self, ignore: bool) -> Self {
        self.ignore_unmatched = ignore;
        self
    }
}

/// Resolved (ordinal, name) pairs for one executed query.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    ordinals: Vec<usize>,
    names: Arc<[String]>,
}

impl ColumnMapping {
    pub fn new(columns: Vec<(usize, String)>) -> Self {
        let (ordinals, names): (Vec<usize>, Vec<String>) = columns.into_iter().unzip();
        Self {
            ordinals,
            names: names.into(),
        }
    }

    /// Resolve `selection` against the cursor's schema.
    /// Reads no rows.
    pub fn resolve(cursor: &dyn RowCursor, selection: &ColumnSelection) -> Result<Self> {
        let field_count = cursor.field_count();
        let mut columns = Vec::new();

        match &selection.selector {
            ColumnSelector::All => {
                for ordinal in 0..field_count {
                    columns.push((ordinal, cursor.field_name(ordinal)?.to_string()));
                }
            }
            ColumnSelector::Ordinals(ordinals) => {
                for &ordinal in ordinals {
                    if ordinal >= field_count {
                        if selection.ignore_unmatched {
                            continue;
                        }
                        return Err(DbKitError::OrdinalOutOfRange {
                            ordinal,
                            field_count,
                        });
                    }
                    columns.push((ordinal, cursor.field_name(ordinal)?.to_string()));
                }
            }
            ColumnSelector::Names(names) => {
                // First occurrence wins when the schema repeats a name.
                let mut schema: HashMap<String, usize> = HashMap::with_capacity(field_count);
                for ordinal in (0..field_count).rev() {
                    schema.insert(fold_name(cursor.field_name(ordinal)?), ordinal);
                }
                for name in names {
                    match schema.get(&fold_name(name)) {
                        Some(&ordinal) => {
                            columns.push((ordinal, cursor.field_name(ordinal)?.to_string()))
                        }
                        None if selection.ignore_unmatched => continue,
                        None => return Err(DbKitError::ColumnNotFound(name.clone())),
                    }
                }
            }
        }

        Ok(Self::new(columns))
    }

    /// Copy the mapped fields of the cursor's current row into a new array.
    pub(crate) fn read_row(&self, cursor: &dyn RowCursor) -> Result<Vec<Value>> {
        let mut row = Vec::with_capacity(self.ordinals.len());
        for &ordinal in &self.ordinals {
            if cursor.is_null(ordinal)? {
                row.push(Value::Null);
            } else {
                row.push(cursor.value(ordinal)?);
            }
        }
        Ok(row)
    }

    pub fn ordinals(&self) -> &[usize] {
        &self.ordinals
    }

    /// Column names as they appear in the cursor schema.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub(crate) fn shared_names(&self) -> Arc<[String]> {
        Arc::clone(&self.names)
    }

    /// Position of `name` within the mapping, ignoring case.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| names_match(n, name))
    }

    pub fn len(&self) -> usize {
        self.ordinals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.is_empty()
    }
}
