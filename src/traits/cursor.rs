use async_trait::async_trait;

use crate::error::Result;
use crate::types::Value;

/// Forward-only cursor over the rows produced by a query.
///
/// The schema (`field_count` / `field_name`) is available before the first
/// call to [`advance`](RowCursor::advance). Field accessors read the row the
/// cursor currently sits on.
#[async_trait]
pub trait RowCursor: Send {
    /// Move to the next row. Returns `false` once the rows are exhausted.
    async fn advance(&mut self) -> Result<bool>;

    /// Number of fields in each row.
    fn field_count(&self) -> usize;

    /// Name of the field at `ordinal`, as reported by the driver.
    fn field_name(&self, ordinal: usize) -> Result<&str>;

    /// Value of the field at `ordinal` in the current row.
    fn value(&self, ordinal: usize) -> Result<Value>;

    /// Whether the field at `ordinal` in the current row is NULL.
    fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.value(ordinal)?.is_null())
    }
}
