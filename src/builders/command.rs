use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{DbKitError, Result};
use crate::executor::{CommandDescriptor, CommandExecutor};
use crate::materialize::{ColumnSelection, FieldOverrides, QueryResult};
use crate::streaming::RowStream;
use crate::traits::Entity;
use crate::types::{FromValue, ParamType, Parameter, Record, TransactionHandle, Value};

/// Fluent builder for a single command.
///
/// Argument errors (such as a duplicate parameter name) are held back and
/// reported by the terminal method, before any connection is acquired.
pub struct CommandBuilder<'c> {
    executor: CommandExecutor,
    descriptor: CommandDescriptor<'c>,
    cancel: CancellationToken,
    error: Option<DbKitError>,
}

impl<'c> CommandBuilder<'c> {
    pub(crate) fn new(executor: CommandExecutor, descriptor: CommandDescriptor<'c>) -> Self {
        Self {
            executor,
            descriptor,
            cancel: CancellationToken::new(),
            error: None,
        }
    }

    fn push(mut self, parameter: Parameter) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.descriptor.command.parameters.push(parameter) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Bind a named parameter.
    pub fn param(self, name: &str, value: impl Into<Value>) -> Self {
        self.push(Parameter::new(name, value))
    }

    /// Bind a named parameter with an explicit provider type.
    pub fn typed_param(self, name: &str, value: impl Into<Value>, type_tag: ParamType) -> Self {
        self.push(Parameter::typed(name, value, type_tag))
    }

    /// Limit how long the execute step may take.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.descriptor.command.timeout = Some(timeout);
        self
    }

    /// Run inside a transaction started on the borrowed connection.
    pub fn transaction(mut self, transaction: TransactionHandle) -> Self {
        self.descriptor.command.transaction = Some(transaction);
        self
    }

    /// Observe `cancel` while the command runs.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Finish building without executing.
    pub fn into_descriptor(self) -> Result<CommandDescriptor<'c>> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.descriptor),
        }
    }

    fn split(self) -> Result<(CommandExecutor, CommandDescriptor<'c>, CancellationToken)> {
        if let Some(e) = self.error {
            return Err(e);
        }
        Ok((self.executor, self.descriptor, self.cancel))
    }

    /// Execute a command that returns no rows; yields the affected row count.
    pub async fn execute(self) -> Result<u64> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.execute(descriptor, &cancel).await
    }

    /// First field of the first row, or `Value::Null`.
    pub async fn scalar(self) -> Result<Value> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.scalar(descriptor, &cancel).await
    }

    /// First field of the first row, converted.
    pub async fn scalar_as<T: FromValue>(self) -> Result<T> {
        let text = self.descriptor.command.text.clone();
        let value = self.scalar().await?;
        let found = value.type_name();
        T::from_value(value).ok_or_else(|| DbKitError::TypeMismatch {
            column: text,
            expected: T::type_name(),
            found,
        })
    }

    /// Execute and buffer every column of every row.
    pub async fn query(self) -> Result<QueryResult> {
        self.query_with(ColumnSelection::all()).await
    }

    /// Execute and buffer the named columns, in the given order.
    /// Names the result lacks follow the executor's `ignore_unmatched_columns`.
    pub async fn query_columns(self, names: &[&str]) -> Result<QueryResult> {
        let ignore = self.executor.config().ignore_unmatched_columns;
        self.query_with(ColumnSelection::names(names.iter().copied()).ignore_unmatched(ignore))
            .await
    }

    /// Execute and buffer the columns picked by `selection`.
    pub async fn query_with(self, selection: ColumnSelection) -> Result<QueryResult> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.query(descriptor, &selection, &cancel).await
    }

    /// Execute and return every row as a record.
    pub async fn records(self) -> Result<Vec<Record>> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.query_records(descriptor, &cancel).await
    }

    /// Execute and map every row onto `T`.
    pub async fn fetch_all<T: Entity>(self) -> Result<Vec<T>> {
        self.fetch_all_with(&FieldOverrides::new()).await
    }

    /// Execute and map every row onto `T`, renaming members per `overrides`.
    pub async fn fetch_all_with<T: Entity>(self, overrides: &FieldOverrides) -> Result<Vec<T>> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.query_as(descriptor, overrides, &cancel).await
    }

    /// Execute and map the first row onto `T`, if any.
    pub async fn fetch_optional<T: Entity>(self) -> Result<Option<T>> {
        let (executor, descriptor, cancel) = self.split()?;
        executor
            .query_first_as(descriptor, &FieldOverrides::new(), &cancel)
            .await
    }
}

impl CommandBuilder<'static> {
    /// Stream every column through a channel of the executor's default capacity.
    pub fn stream(self) -> Result<RowStream> {
        let capacity = self.executor.config().stream_capacity;
        self.stream_with(ColumnSelection::all(), capacity)
    }

    /// Stream the selected columns through a channel holding `capacity` rows.
    pub fn stream_with(self, selection: ColumnSelection, capacity: usize) -> Result<RowStream> {
        let (executor, descriptor, cancel) = self.split()?;
        executor.stream(descriptor, selection, capacity, &cancel)
    }
}

impl std::fmt::Debug for CommandBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuilder")
            .field("source", &self.descriptor.source.kind())
            .field("command", &self.descriptor.command)
            .field("error", &self.error)
            .finish()
    }
}
