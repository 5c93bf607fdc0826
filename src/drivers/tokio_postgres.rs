use std::pin::Pin;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::task::JoinHandle;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row, RowStream, Statement};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{DbKitError, Result};
use crate::traits::{Connection, ConnectionFactory, RowCursor};
use crate::types::{Command, CommandKind, FromValue, ParamType, TransactionHandle, Value};

/// PostgreSQL connection factory using tokio-postgres.
pub struct TokioPostgresFactory {
    config: Config,
}

impl TokioPostgresFactory {
    /// Parse a connection string. No connection is made until a command runs.
    pub fn new(connection_string: &str) -> Result<Self> {
        let config = Config::from_str(connection_string)
            .map_err(|e| DbKitError::InvalidArgument(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ConnectionFactory for TokioPostgresFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(TokioPostgresConnection::new(self.config.clone())))
    }
}

/// PostgreSQL connection using tokio-postgres.
///
/// Parameters bind positionally (`$1`, `$2`, ...) in the order they were
/// added to the command; their names are not consulted.
pub struct TokioPostgresConnection {
    config: Config,
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
    next_transaction: u64,
    transaction: Option<TransactionHandle>,
}

impl TokioPostgresConnection {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            driver: None,
            next_transaction: 1,
            transaction: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .filter(|c| !c.is_closed())
            .ok_or_else(|| DbKitError::QueryFailed("connection is not open".to_string()))
    }

    fn check_transaction(&self, command: &Command) -> Result<()> {
        match command.transaction {
            Some(tx) if self.transaction != Some(tx) => Err(DbKitError::QueryFailed(format!(
                "transaction {} is not active on this connection",
                tx.0
            ))),
            _ => Ok(()),
        }
    }

    async fn prepare(&self, command: &Command) -> Result<Statement> {
        self.check_transaction(command)?;
        let client = self.client()?;
        let text = statement_text(command);
        let result = if command.parameters.iter().any(|p| p.type_tag.is_some()) {
            let types: Vec<Type> = command
                .parameters
                .iter()
                .map(|p| {
                    p.type_tag
                        .map(pg_type)
                        .unwrap_or_else(|| natural_type(&p.value))
                })
                .collect();
            client.prepare_typed(&text, &types).await
        } else {
            client.prepare(&text).await
        };
        result.map_err(|e| DbKitError::QueryFailed(e.to_string()))
    }

    async fn batch(&self, sql: &str) -> Result<()> {
        self.client()?
            .batch_execute(sql)
            .await
            .map_err(|e| DbKitError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl Connection for TokioPostgresConnection {
    fn is_open(&self) -> bool {
        self.client.as_ref().is_some_and(|c| !c.is_closed())
    }

    async fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| DbKitError::ConnectionFailed(e.to_string()))?;

        // Spawn the connection handler
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection error");
            }
        });

        self.client = Some(client);
        self.driver = Some(driver);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.transaction = None;
        // Dropping the client ends the connection future.
        self.client = None;
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                debug!(error = %e, "PostgreSQL connection task ended abnormally");
            }
        }
        Ok(())
    }

    async fn query<'a>(&'a mut self, command: &Command) -> Result<Box<dyn RowCursor + 'a>> {
        let statement = self.prepare(command).await?;
        let params = bind_params(&statement, command)?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let stream = self
            .client()?
            .query_raw(&statement, params.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)))
            .await
            .map_err(|e| DbKitError::QueryFailed(e.to_string()))?;
        Ok(Box::new(PostgresCursor {
            columns,
            stream: Box::pin(stream),
            current: None,
        }))
    }

    async fn execute(&mut self, command: &Command) -> Result<u64> {
        let statement = self.prepare(command).await?;
        let params = bind_params(&statement, command)?;
        let param_refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        self.client()?
            .execute(&statement, &param_refs)
            .await
            .map_err(|e| DbKitError::QueryFailed(e.to_string()))
    }

    async fn begin_transaction(&mut self) -> Result<TransactionHandle> {
        if self.transaction.is_some() {
            return Err(DbKitError::InvalidArgument(
                "a transaction is already active on this connection".to_string(),
            ));
        }
        self.batch("BEGIN").await?;
        let handle = TransactionHandle(self.next_transaction);
        self.next_transaction += 1;
        self.transaction = Some(handle);
        Ok(handle)
    }

    async fn commit(&mut self, transaction: TransactionHandle) -> Result<()> {
        self.end_transaction(transaction, "COMMIT").await
    }

    async fn rollback(&mut self, transaction: TransactionHandle) -> Result<()> {
        self.end_transaction(transaction, "ROLLBACK").await
    }
}

impl TokioPostgresConnection {
    async fn end_transaction(&mut self, transaction: TransactionHandle, sql: &str) -> Result<()> {
        if self.transaction != Some(transaction) {
            return Err(DbKitError::InvalidArgument(format!(
                "transaction {} is not active",
                transaction.0
            )));
        }
        self.batch(sql).await?;
        self.transaction = None;
        Ok(())
    }
}

/// Forward-only cursor over a tokio-postgres row stream.
struct PostgresCursor {
    columns: Vec<String>,
    stream: Pin<Box<RowStream>>,
    current: Option<Row>,
}

impl PostgresCursor {
    fn current(&self) -> Result<&Row> {
        self.current
            .as_ref()
            .ok_or_else(|| DbKitError::QueryFailed("no current row".to_string()))
    }
}

#[async_trait]
impl RowCursor for PostgresCursor {
    async fn advance(&mut self) -> Result<bool> {
        match self.stream.next().await {
            Some(Ok(row)) => {
                self.current = Some(row);
                Ok(true)
            }
            Some(Err(e)) => Err(DbKitError::QueryFailed(e.to_string())),
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn field_name(&self, ordinal: usize) -> Result<&str> {
        self.columns
            .get(ordinal)
            .map(|name| name.as_str())
            .ok_or(DbKitError::OrdinalOutOfRange {
                ordinal,
                field_count: self.columns.len(),
            })
    }

    fn value(&self, ordinal: usize) -> Result<Value> {
        self.field_name(ordinal)?;
        row_value(self.current()?, ordinal)
    }
}

/// Text sent to the server: plain text as-is, a stored procedure as a
/// `CALL` with one placeholder per parameter.
fn statement_text(command: &Command) -> String {
    match command.kind {
        CommandKind::Text => command.text.clone(),
        CommandKind::StoredProcedure => {
            let placeholders: Vec<String> = (1..=command.parameters.len())
                .map(|i| format!("${i}"))
                .collect();
            format!("CALL {}({})", command.text, placeholders.join(", "))
        }
    }
}

fn pg_type(tag: ParamType) -> Type {
    match tag {
        ParamType::Bool => Type::BOOL,
        ParamType::Int16 => Type::INT2,
        ParamType::Int32 => Type::INT4,
        ParamType::Int64 => Type::INT8,
        ParamType::Float32 => Type::FLOAT4,
        ParamType::Float64 => Type::FLOAT8,
        ParamType::Text => Type::TEXT,
        ParamType::Bytes => Type::BYTEA,
    }
}

fn natural_type(value: &Value) -> Type {
    match value {
        Value::Bool(_) => Type::BOOL,
        Value::Int16(_) => Type::INT2,
        Value::Int32(_) => Type::INT4,
        Value::Int64(_) => Type::INT8,
        Value::Float32(_) => Type::FLOAT4,
        Value::Float64(_) => Type::FLOAT8,
        Value::Bytes(_) => Type::BYTEA,
        Value::Null | Value::Text(_) => Type::TEXT,
    }
}

/// SQL NULL that binds to a parameter of any type.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert each parameter to the native type the statement expects.
fn bind_params(statement: &Statement, command: &Command) -> Result<Vec<Box<dyn ToSql + Sync + Send>>> {
    let expected = statement.params();
    if expected.len() != command.parameters.len() {
        return Err(DbKitError::InvalidArgument(format!(
            "statement expects {} parameter(s), command has {}",
            expected.len(),
            command.parameters.len()
        )));
    }
    command
        .parameters
        .iter()
        .zip(expected)
        .map(|(param, ty)| value_to_sql(&param.value, ty, &param.name))
        .collect()
}

fn mismatch(value: &Value, name: &str, expected: &'static str) -> DbKitError {
    DbKitError::TypeMismatch {
        column: name.to_string(),
        expected,
        found: value.type_name(),
    }
}

fn convert<T: FromValue>(value: &Value, name: &str) -> Result<T> {
    T::from_value(value.clone()).ok_or_else(|| mismatch(value, name, T::type_name()))
}

/// Parse a text value; other variants do not convert.
fn parse_text<T>(
    value: &Value,
    name: &str,
    expected: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    match value {
        Value::Text(text) => parse(text.trim()),
        _ => None,
    }
    .ok_or_else(|| mismatch(value, name, expected))
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

fn parse_timestamptz(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn to_decimal(value: &Value, name: &str) -> Result<Decimal> {
    let decimal = match value {
        Value::Int16(i) => Some(Decimal::from(*i)),
        Value::Int32(i) => Some(Decimal::from(*i)),
        Value::Int64(i) => Some(Decimal::from(*i)),
        Value::Float32(f) => Decimal::from_f32_retain(*f),
        Value::Float64(f) => Decimal::from_f64_retain(*f),
        Value::Text(text) => Decimal::from_str(text.trim()).ok(),
        _ => None,
    };
    decimal.ok_or_else(|| mismatch(value, name, "numeric"))
}

fn to_json(value: &Value, name: &str) -> Result<serde_json::Value> {
    let json = match value {
        Value::Text(text) => serde_json::from_str(text).ok(),
        Value::Bool(b) => Some((*b).into()),
        Value::Int16(i) => Some((*i).into()),
        Value::Int32(i) => Some((*i).into()),
        Value::Int64(i) => Some((*i).into()),
        Value::Float32(f) => serde_json::Number::from_f64(f64::from(*f)).map(Into::into),
        Value::Float64(f) => serde_json::Number::from_f64(*f).map(Into::into),
        Value::Null | Value::Bytes(_) => None,
    };
    json.ok_or_else(|| mismatch(value, name, "json"))
}

/// Convert a Value to a boxed ToSql trait object matching `ty`.
/// Text binds to date, time, numeric, uuid and json parameters in the
/// server's text format.
fn value_to_sql(value: &Value, ty: &Type, name: &str) -> Result<Box<dyn ToSql + Sync + Send>> {
    if value.is_null() {
        return Ok(Box::new(SqlNull));
    }
    let boxed: Box<dyn ToSql + Sync + Send> = match *ty {
        Type::BOOL => Box::new(convert::<bool>(value, name)?),
        Type::INT2 => Box::new(convert::<i16>(value, name)?),
        Type::INT4 => Box::new(convert::<i32>(value, name)?),
        Type::INT8 => Box::new(convert::<i64>(value, name)?),
        Type::FLOAT4 => Box::new(convert::<f32>(value, name)?),
        Type::FLOAT8 => Box::new(convert::<f64>(value, name)?),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            Box::new(convert::<String>(value, name)?)
        }
        Type::BYTEA => Box::new(convert::<Vec<u8>>(value, name)?),
        Type::NUMERIC => Box::new(to_decimal(value, name)?),
        Type::DATE => Box::new(parse_text::<NaiveDate>(value, name, "date", |s| s.parse().ok())?),
        Type::TIME => Box::new(parse_text::<NaiveTime>(value, name, "time", |s| s.parse().ok())?),
        Type::TIMESTAMP => Box::new(parse_text(value, name, "timestamp", parse_timestamp)?),
        Type::TIMESTAMPTZ => Box::new(parse_text(value, name, "timestamptz", parse_timestamptz)?),
        Type::UUID => Box::new(parse_text(value, name, "uuid", |s| Uuid::parse_str(s).ok())?),
        Type::JSON | Type::JSONB => Box::new(to_json(value, name)?),
        _ => match value {
            Value::Null => Box::new(SqlNull),
            Value::Bool(b) => Box::new(*b),
            Value::Int16(i) => Box::new(*i),
            Value::Int32(i) => Box::new(*i),
            Value::Int64(i) => Box::new(*i),
            Value::Float32(f) => Box::new(*f),
            Value::Float64(f) => Box::new(*f),
            Value::Text(s) => Box::new(s.clone()),
            Value::Bytes(b) => Box::new(b.clone()),
        },
    };
    Ok(boxed)
}

/// A column value decoded according to its PostgreSQL type.
///
/// Numerics, dates and times, UUIDs and JSON have no `Value` variant and are
/// rendered as text. Any other type comes back raw: text when it is valid
/// UTF-8, bytes otherwise. Reading a column never fails because of its type.
struct PgValue(Value);

impl<'a> FromSql<'a> for PgValue {
    fn from_sql(
        ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int16(i16::from_sql(ty, raw)?),
            Type::INT4 => Value::Int32(i32::from_sql(ty, raw)?),
            Type::INT8 => Value::Int64(i64::from_sql(ty, raw)?),
            Type::FLOAT4 => Value::Float32(f32::from_sql(ty, raw)?),
            Type::FLOAT8 => Value::Float64(f64::from_sql(ty, raw)?),
            Type::BYTEA => Value::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Text(Decimal::from_sql(ty, raw)?.to_string()),
            Type::DATE => Value::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
            Type::TIME => Value::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMP => Value::Text(NaiveDateTime::from_sql(ty, raw)?.to_string()),
            Type::TIMESTAMPTZ => Value::Text(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
            Type::UUID => Value::Text(Uuid::from_sql(ty, raw)?.to_string()),
            Type::JSON | Type::JSONB => {
                Value::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
            }
            _ if <&str as FromSql>::accepts(ty) => {
                Value::Text(<&str as FromSql>::from_sql(ty, raw)?.to_string())
            }
            _ => match std::str::from_utf8(raw) {
                Ok(text) => Value::Text(text.to_string()),
                Err(_) => Value::Bytes(raw.to_vec()),
            },
        };
        Ok(PgValue(value))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// Read the field at `ordinal` as a Value.
fn row_value(row: &Row, ordinal: usize) -> Result<Value> {
    row.try_get::<_, Option<PgValue>>(ordinal)
        .map(|value| value.map_or(Value::Null, |v| v.0))
        .map_err(|e| DbKitError::QueryFailed(e.to_string()))
}
