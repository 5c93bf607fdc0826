use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DbKitError, Result};
use crate::materialize::{ColumnMapping, ColumnSelection, Entities, FieldOverrides};
use crate::traits::{Entity, RowCursor};
use crate::types::{Record, Value};

/// Buffered result of a query: the resolved column mapping and a queue of
/// row arrays laid out in mapping order.
///
/// Every accessor that hands out rows dequeues them, so the rows can be
/// consumed once in total. The queue cannot be copied either:
///
/// ```compile_fail
/// fn copy(result: &dbkit::QueryResult) -> dbkit::QueryResult {
///     result.clone()
/// }
/// ```
#[derive(Debug, PartialEq)]
pub struct QueryResult {
    mapping: ColumnMapping,
    rows: VecDeque<Vec<Value>>,
}

impl QueryResult {
    pub fn new(mapping: ColumnMapping, rows: VecDeque<Vec<Value>>) -> Self {
        Self { mapping, rows }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Returns the column names from this result.
    pub fn columns(&self) -> &[String] {
        self.mapping.names()
    }

    /// Returns the number of rows not yet consumed.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows remain.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Dequeue the next raw row.
    pub fn next_row(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    /// Drain the raw rows lazily.
    pub fn rows(&mut self) -> impl Iterator<Item = Vec<Value>> + '_ {
        std::iter::from_fn(move || self.rows.pop_front())
    }

    /// Drain the rows lazily as records.
    pub fn records(&mut self) -> impl Iterator<Item = Record> + '_ {
        let names = self.mapping.shared_names();
        std::iter::from_fn(move || {
            self.rows
                .pop_front()
                .map(|values| Record::new(names.clone(), values))
        })
    }

    /// Drain the rows lazily as entities of type `T`.
    pub fn entities<T: Entity>(&mut self, overrides: &FieldOverrides) -> Entities<'_, T> {
        Entities::new(&mut self.rows, self.mapping.names(), overrides)
    }

    /// Consume the result, returning the remaining raw rows.
    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows.into()
    }

    /// Extracts a single record from the result.
    /// Returns an error if the result contains zero or more than one row.
    pub fn single_row(mut self) -> Result<Record> {
        if self.rows.len() != 1 {
            return Err(DbKitError::UnexpectedRowCount {
                expected: 1,
                actual: self.rows.len(),
            });
        }
        self.records().next().ok_or(DbKitError::UnexpectedRowCount {
            expected: 1,
            actual: 0,
        })
    }
}

/// Advance the cursor and copy the next row, or `None` at the end.
/// Fails with [`DbKitError::Cancelled`] if `cancel` fires while waiting.
pub(crate) async fn fetch_row(
    cursor: &mut dyn RowCursor,
    mapping: &ColumnMapping,
    cancel: &CancellationToken,
) -> Result<Option<Vec<Value>>> {
    let advanced = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DbKitError::Cancelled),
        advanced = cursor.advance() => advanced?,
    };
    if !advanced {
        return Ok(None);
    }
    mapping.read_row(cursor).map(Some)
}

/// Read the whole cursor into a [`QueryResult`].
///
/// Columns are resolved before the first row is read, so selection errors
/// never consume the cursor.
pub async fn retrieve(cursor: &mut dyn RowCursor, selection: &ColumnSelection) -> Result<QueryResult> {
    retrieve_cancellable(cursor, selection, &CancellationToken::new()).await
}

/// Like [`retrieve`], stopping with [`DbKitError::Cancelled`] when `cancel` fires.
pub async fn retrieve_cancellable(
    cursor: &mut dyn RowCursor,
    selection: &ColumnSelection,
    cancel: &CancellationToken,
) -> Result<QueryResult> {
    let mapping = ColumnMapping::resolve(cursor, selection)?;
    let mut rows = VecDeque::new();
    while let Some(row) = fetch_row(cursor, &mapping, cancel).await? {
        rows.push_back(row);
    }
    debug!(rows = rows.len(), columns = mapping.len(), "retrieved result set");
    Ok(QueryResult::new(mapping, rows))
}
