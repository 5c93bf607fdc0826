use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::{DbKitError, Result};
use crate::materialize::{self, ColumnSelection, FieldOverrides, QueryResult};
use crate::pool::ConnectionPool;
use crate::traits::{Connection, ConnectionFactory, Entity, RowCursor};
use crate::types::{Command, CommandKind, Parameter, Record, TransactionHandle, Value};

/// Where a command gets its connection from.
pub enum ConnectionSource<'c> {
    /// A new connection per command, closed when the command finishes.
    Factory(Arc<dyn ConnectionFactory>),
    /// A pooled connection, returned to the pool when the command finishes.
    Pool(Arc<ConnectionPool>),
    /// A caller-owned connection. It is never closed by the executor; if it
    /// had to be opened for the command it is closed again afterwards.
    Borrowed(&'c mut dyn Connection),
}

impl ConnectionSource<'_> {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ConnectionSource::Factory(_) => "factory",
            ConnectionSource::Pool(_) => "pool",
            ConnectionSource::Borrowed(_) => "borrowed",
        }
    }
}

/// A command together with the connection it should run on.
pub struct CommandDescriptor<'c> {
    pub source: ConnectionSource<'c>,
    pub command: Command,
}

impl<'c> CommandDescriptor<'c> {
    pub fn new(source: ConnectionSource<'c>, text: impl Into<String>) -> Self {
        Self {
            source,
            command: Command::new(CommandKind::Text, text),
        }
    }

    pub fn procedure(source: ConnectionSource<'c>, name: impl Into<String>) -> Self {
        Self {
            source,
            command: Command::new(CommandKind::StoredProcedure, name),
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Result<Self> {
        self.command.parameters.push(parameter)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command.timeout = Some(timeout);
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionHandle) -> Self {
        self.command.transaction = Some(transaction);
        self
    }

    /// Reject descriptors that cannot run, before any connection is touched.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.command.text.trim().is_empty() {
            return Err(DbKitError::InvalidArgument(
                "command text must not be empty".to_string(),
            ));
        }
        if self.command.transaction.is_some()
            && !matches!(self.source, ConnectionSource::Borrowed(_))
        {
            return Err(DbKitError::InvalidArgument(
                "a transaction requires the connection it was started on".to_string(),
            ));
        }
        Ok(())
    }
}

/// A connection acquired for the duration of one command.
pub(crate) enum Lease<'c> {
    Owned {
        conn: Box<dyn Connection>,
        pool: Option<Arc<ConnectionPool>>,
    },
    Borrowed {
        conn: &'c mut dyn Connection,
        opened_here: bool,
    },
}

impl Lease<'_> {
    pub(crate) fn connection(&mut self) -> &mut dyn Connection {
        match self {
            Lease::Owned { conn, .. } => conn.as_mut(),
            Lease::Borrowed { conn, .. } => &mut **conn,
        }
    }

    /// Give back whatever this lease acquired. `succeeded` decides whether a
    /// pooled connection is trusted enough to go back into the pool.
    pub(crate) async fn release(self, succeeded: bool) {
        match self {
            Lease::Owned {
                conn,
                pool: Some(pool),
            } if succeeded => pool.release(conn).await,
            Lease::Owned { mut conn, .. } => close_quietly(conn.as_mut()).await,
            Lease::Borrowed {
                conn,
                opened_here: true,
            } => close_quietly(conn).await,
            Lease::Borrowed { .. } => {}
        }
    }
}

/// Holds a lease while a command runs. If the command future is dropped
/// before it releases the lease, an owned connection is closed from a
/// spawned task. A borrowed connection cannot outlive its borrow in a task and
/// is left as it is, so cancel through the token to have it closed.
struct LeaseGuard<'c>(Option<Lease<'c>>);

impl<'c> LeaseGuard<'c> {
    fn connection(&mut self) -> Option<&mut dyn Connection> {
        self.0.as_mut().map(Lease::connection)
    }

    async fn release(mut self, succeeded: bool) {
        if let Some(lease) = self.0.take() {
            lease.release(succeeded).await;
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let Some(Lease::Owned { mut conn, .. }) = self.0.take() else {
            return;
        };
        if !conn.is_open() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("command dropped mid-flight; closing its connection");
                handle.spawn(async move { close_quietly(conn.as_mut()).await });
            }
            Err(_) => warn!("command dropped outside a runtime; connection not closed"),
        }
    }
}

async fn close_quietly(conn: &mut dyn Connection) {
    if !conn.is_open() {
        return;
    }
    match conn.close().await {
        Ok(()) => debug!("connection closed"),
        Err(e) => warn!(error = %e, "failed to close connection"),
    }
}

/// Await `fut`, failing with `Cancelled` if the token fires first and with
/// `Timeout` if `timeout` elapses first.
pub(crate) async fn guarded<T>(
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    let timed = async move {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(DbKitError::Timeout(limit)),
            },
            None => fut.await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbKitError::Cancelled),
        result = timed => result,
    }
}

/// Runs commands: acquires a connection, executes, and releases it on
/// every exit path.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Validate the descriptor and split it into source and command with
    /// configured defaults applied.
    pub(crate) fn prepare<'c>(
        &self,
        descriptor: CommandDescriptor<'c>,
        cancel: &CancellationToken,
    ) -> Result<(ConnectionSource<'c>, Command)> {
        if cancel.is_cancelled() {
            return Err(DbKitError::Cancelled);
        }
        descriptor.validate()?;
        let CommandDescriptor {
            source,
            mut command,
        } = descriptor;
        if command.timeout.is_none() {
            command.timeout = self.config.default_timeout;
        }
        Ok((source, command))
    }

    /// Resolve the source into an open connection.
    pub(crate) async fn acquire<'c>(
        &self,
        source: ConnectionSource<'c>,
        cancel: &CancellationToken,
    ) -> Result<Lease<'c>> {
        let kind = source.kind();
        let mut lease = match source {
            ConnectionSource::Factory(factory) => Lease::Owned {
                conn: guarded(cancel, None, factory.connect()).await?,
                pool: None,
            },
            ConnectionSource::Pool(pool) => Lease::Owned {
                conn: guarded(cancel, None, pool.acquire()).await?,
                pool: Some(pool),
            },
            ConnectionSource::Borrowed(conn) => Lease::Borrowed {
                conn,
                opened_here: false,
            },
        };

        let conn = lease.connection();
        if !conn.is_open() {
            if let Err(e) = guarded(cancel, None, conn.open()).await {
                lease.release(false).await;
                return Err(e);
            }
            if let Lease::Borrowed { opened_here, .. } = &mut lease {
                *opened_here = true;
            }
            debug!(source = kind, "connection opened");
        }
        Ok(lease)
    }

    /// Run `handler` against a live connection and the bound command.
    ///
    /// This is the general form the other operations are built on; the
    /// connection is released after the handler's future completes,
    /// fails or is cancelled through `cancel`. Dropping the returned future
    /// instead still closes a factory or pool connection, but leaves a
    /// borrowed connection the way the command found or opened it.
    pub async fn run<'c, R, F>(
        &self,
        descriptor: CommandDescriptor<'c>,
        cancel: &CancellationToken,
        handler: F,
    ) -> Result<R>
    where
        F: for<'x> FnOnce(&'x mut dyn Connection, &'x Command) -> BoxFuture<'x, Result<R>>,
    {
        let (source, command) = self.prepare(descriptor, cancel)?;
        let mut lease = LeaseGuard(Some(self.acquire(source, cancel).await?));
        debug!(
            text = %command.text,
            parameters = command.parameters.len(),
            "executing command"
        );
        let Some(conn) = lease.connection() else {
            return Err(DbKitError::ConnectionFailed("connection was released".to_string()));
        };
        let result = guarded(cancel, None, handler(conn, &command)).await;
        lease.release(result.is_ok()).await;
        result
    }

    /// Execute a command that returns no rows; yields the affected row count.
    pub async fn execute(
        &self,
        descriptor: CommandDescriptor<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let cancel_step = cancel.clone();
        self.run(descriptor, cancel, move |conn, command| {
            Box::pin(async move {
                guarded(&cancel_step, command.timeout, conn.execute(command)).await
            })
        })
        .await
    }

    /// First field of the first row, or `Value::Null` for an empty result.
    pub async fn scalar(
        &self,
        descriptor: CommandDescriptor<'_>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let cancel_step = cancel.clone();
        self.run(descriptor, cancel, move |conn, command| {
            Box::pin(async move {
                guarded(&cancel_step, command.timeout, conn.scalar(command)).await
            })
        })
        .await
    }

    /// Hand the live cursor to `handler`. The cursor is dropped before the
    /// connection is released.
    pub async fn with_cursor<'c, R, F>(
        &self,
        descriptor: CommandDescriptor<'c>,
        cancel: &CancellationToken,
        handler: F,
    ) -> Result<R>
    where
        F: for<'x> FnOnce(&'x mut dyn RowCursor) -> BoxFuture<'x, Result<R>> + Send + 'static,
        R: Send + 'static,
    {
        let cancel_step = cancel.clone();
        self.run(descriptor, cancel, move |conn, command| {
            Box::pin(async move {
                let mut cursor =
                    guarded(&cancel_step, command.timeout, conn.query(command)).await?;
                handler(&mut *cursor).await
            })
        })
        .await
    }

    /// Execute a query and buffer its rows.
    pub async fn query(
        &self,
        descriptor: CommandDescriptor<'_>,
        selection: &ColumnSelection,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let cancel_step = cancel.clone();
        let selection = selection.clone();
        self.run(descriptor, cancel, move |conn, command| {
            Box::pin(async move {
                let mut cursor =
                    guarded(&cancel_step, command.timeout, conn.query(command)).await?;
                materialize::retrieve_cancellable(&mut *cursor, &selection, &cancel_step).await
            })
        })
        .await
    }

    /// Execute a query and return every row as a record.
    pub async fn query_records(
        &self,
        descriptor: CommandDescriptor<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>> {
        let mut result = self
            .query(descriptor, &ColumnSelection::all(), cancel)
            .await?;
        Ok(result.records().collect())
    }

    /// Execute a query and map every row onto `T`.
    pub async fn query_as<T: Entity>(
        &self,
        descriptor: CommandDescriptor<'_>,
        overrides: &FieldOverrides,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>> {
        let mut result = self
            .query(descriptor, &ColumnSelection::all(), cancel)
            .await?;
        result.entities(overrides).collect()
    }

    /// Execute a query and map its first row onto `T`, if there is one.
    pub async fn query_first_as<T: Entity>(
        &self,
        descriptor: CommandDescriptor<'_>,
        overrides: &FieldOverrides,
        cancel: &CancellationToken,
    ) -> Result<Option<T>> {
        let mut result = self
            .query(descriptor, &ColumnSelection::all(), cancel)
            .await?;
        result.entities(overrides).next().transpose()
    }
}
