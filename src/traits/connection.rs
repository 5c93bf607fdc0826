use async_trait::async_trait;

use crate::error::{DbKitError, Result};
use crate::traits::RowCursor;
use crate::types::{Command, TransactionHandle, Value};

/// Produces new, unopened connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>>;
}

/// Trait for database driver connections.
/// Drivers are responsible for:
/// - Opening and closing the underlying session
/// - Converting `Value` parameters to native types
/// - Executing commands and exposing results through a `RowCursor`
#[async_trait]
pub trait Connection: Send {
    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<()>;

    /// Close the connection. Closing an already closed connection is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Execute a command that returns rows.
    async fn query<'a>(&'a mut self, command: &Command) -> Result<Box<dyn RowCursor + 'a>>;

    /// Execute a command that does not return rows; yields the affected row count.
    async fn execute(&mut self, command: &Command) -> Result<u64>;

    /// Execute a command and return the first field of the first row,
    /// or `Value::Null` when there is none.
    async fn scalar(&mut self, command: &Command) -> Result<Value> {
        let mut cursor = self.query(command).await?;
        if cursor.advance().await? && cursor.field_count() > 0 {
            cursor.value(0)
        } else {
            Ok(Value::Null)
        }
    }

    async fn begin_transaction(&mut self) -> Result<TransactionHandle> {
        Err(DbKitError::Unsupported("transactions".to_string()))
    }

    async fn commit(&mut self, _transaction: TransactionHandle) -> Result<()> {
        Err(DbKitError::Unsupported("transactions".to_string()))
    }

    async fn rollback(&mut self, _transaction: TransactionHandle) -> Result<()> {
        Err(DbKitError::Unsupported("transactions".to_string()))
    }
}
