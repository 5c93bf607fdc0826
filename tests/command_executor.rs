use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dbkit::drivers::{InMemoryTestDriver, InMemoryTestResponseBuilder};
use dbkit::error::DbKitError;
use dbkit::{
    ColumnSelection, CommandDescriptor, CommandExecutor, CommandKind, Connection, ConnectionPool,
    ConnectionSource, DbKitClient, Entity, EntityMap, ExecutorConfig, FieldOverrides, Parameter,
    Value,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, PartialEq)]
struct User {
    id: i64,
    name: String,
    email: Option<String>,
}

impl Entity for User {
    fn entity_map() -> &'static EntityMap<Self> {
        static MAP: OnceLock<EntityMap<User>> = OnceLock::new();
        MAP.get_or_init(|| {
            EntityMap::builder()
                .member("id", |u: &mut User, v: i64| u.id = v)
                .member("name", |u: &mut User, v: String| u.name = v)
                .member("email", |u: &mut User, v: Option<String>| u.email = v)
                .build()
        })
    }
}

fn users_response() -> dbkit::drivers::RawQueryResult {
    InMemoryTestResponseBuilder::new()
        .columns(&["id", "name", "email"])
        .row([Value::Int64(1), "Alice".into(), "alice@example.com".into()])
        .row([Value::Int64(2), "Bob".into(), Value::Null])
        .build()
}

#[tokio::test]
async fn test_query_records_command_and_parameters() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone());

    let result = client
        .command("SELECT id, name, email FROM users WHERE name = $1")
        .param("name", "Alice")
        .query()
        .await
        .unwrap();

    driver.assert_last_command(
        "SELECT id, name, email FROM users WHERE name = $1",
        &[Value::Text("Alice".to_string())],
    );
    driver.assert_command_count(1);

    assert_eq!(result.len(), 2);
    assert_eq!(result.columns(), ["id", "name", "email"]);
    assert_eq!(driver.connects(), 1);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_query_columns_reorders() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone());

    let mut result = client
        .command("SELECT * FROM users")
        .query_columns(&["NAME", "id"])
        .await
        .unwrap();

    assert_eq!(result.columns(), ["name", "id"]);
    assert_eq!(
        result.next_row().unwrap(),
        vec![Value::Text("Alice".to_string()), Value::Int64(1)]
    );
}

#[tokio::test]
async fn test_query_columns_missing_name() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone());

    let err = client
        .command("SELECT * FROM users")
        .query_columns(&["id", "age"])
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::ColumnNotFound(name) if name == "age"));
    assert_eq!(driver.rows_read(), 0);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_query_columns_missing_name_ignored_by_config() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone())
        .with_config(ExecutorConfig::new().with_ignore_unmatched_columns(true));

    let result = client
        .command("SELECT * FROM users")
        .query_columns(&["id", "age"])
        .await
        .unwrap();

    assert_eq!(result.columns(), ["id"]);
    assert_eq!(result.len(), 2);
}

#[tokio::test]
async fn test_empty_result() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id"])
                .build(),
        ),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let result = client.command("SELECT id FROM users").query().await.unwrap();

    assert!(result.is_empty());
    assert_eq!(result.columns(), ["id"]);
    let err = result.single_row().unwrap_err();
    assert!(matches!(
        err,
        DbKitError::UnexpectedRowCount {
            expected: 1,
            actual: 0
        }
    ));
}

#[tokio::test]
async fn test_fetch_all_entities() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone());

    let users: Vec<User> = client
        .command("SELECT id, name, email FROM users")
        .fetch_all()
        .await
        .unwrap();

    assert_eq!(
        users,
        vec![
            User {
                id: 1,
                name: "Alice".to_string(),
                email: Some("alice@example.com".to_string()),
            },
            User {
                id: 2,
                name: "Bob".to_string(),
                email: None,
            },
        ]
    );
}

#[tokio::test]
async fn test_fetch_all_with_overrides() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["user_id", "user_name"])
                .row([Value::Int64(7), "Carol".into()])
                .build(),
        ),
    );
    let client = DbKitClient::with_factory(driver.clone());
    let overrides = FieldOverrides::new()
        .map("id", "user_id")
        .map("name", "user_name");

    let users: Vec<User> = client
        .command("SELECT user_id, user_name FROM accounts")
        .fetch_all_with(&overrides)
        .await
        .unwrap();

    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, 7);
    assert_eq!(users[0].name, "Carol");
    assert_eq!(users[0].email, None);
}

#[tokio::test]
async fn test_fetch_optional() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_response(users_response())
            .with_response(
                InMemoryTestResponseBuilder::new()
                    .columns(&["id", "name"])
                    .build(),
            ),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let first: Option<User> = client
        .command("SELECT * FROM users")
        .fetch_optional()
        .await
        .unwrap();
    assert_eq!(first.map(|u| u.id), Some(1));

    let none: Option<User> = client
        .command("SELECT * FROM users WHERE false")
        .fetch_optional()
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_entity_type_mismatch() {
    let driver = Arc::new(
        InMemoryTestDriver::new().with_response(
            InMemoryTestResponseBuilder::new()
                .columns(&["id"])
                .text_row(&["not a number"])
                .build(),
        ),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let err = client
        .command("SELECT id FROM users")
        .fetch_all::<User>()
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::TypeMismatch { column, .. } if column == "id"));
}

#[tokio::test]
async fn test_records() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let client = DbKitClient::with_factory(driver.clone());

    let records = client.command("SELECT * FROM users").records().await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[1].get_as::<String>("NAME").unwrap(), "Bob");
    assert_eq!(records[1].get("email").unwrap(), &Value::Null);
    assert!(records[0].get("missing").is_err());
}

#[tokio::test]
async fn test_execute_returns_affected_count() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_response(InMemoryTestResponseBuilder::new().affected(3).build()),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let affected = client
        .command("UPDATE users SET active = $1 WHERE id < $2")
        .param("@active", true)
        .param(":limit", 4i64)
        .execute()
        .await
        .unwrap();

    assert_eq!(affected, 3);
    driver.assert_last_command(
        "UPDATE users SET active = $1 WHERE id < $2",
        &[Value::Bool(true), Value::Int64(4)],
    );
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_scalar() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_response(
                InMemoryTestResponseBuilder::new()
                    .columns(&["count"])
                    .row([Value::Int64(42)])
                    .build(),
            )
            .with_response(
                InMemoryTestResponseBuilder::new()
                    .columns(&["count"])
                    .build(),
            ),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let count: i64 = client
        .command("SELECT count(*) FROM users")
        .scalar_as()
        .await
        .unwrap();
    assert_eq!(count, 42);

    let empty = client
        .command("SELECT count FROM nothing")
        .scalar()
        .await
        .unwrap();
    assert_eq!(empty, Value::Null);
}

#[tokio::test]
async fn test_stored_procedure() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());

    client
        .procedure("refresh_stats")
        .param("days", 7)
        .execute()
        .await
        .unwrap();

    let last = driver.last_command().unwrap();
    assert_eq!(last.command.kind, CommandKind::StoredProcedure);
    assert_eq!(last.command.text, "refresh_stats");
    assert_eq!(last.command.parameters.values(), vec![Value::Int32(7)]);
}

#[tokio::test]
async fn test_duplicate_parameter_rejected_before_connecting() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());

    let err = client
        .command("SELECT * FROM users WHERE id = $1")
        .param("id", 1)
        .param("@ID", 2)
        .query()
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::DuplicateParameter(_)));
    assert_eq!(driver.connects(), 0);
    driver.assert_command_count(0);
}

#[tokio::test]
async fn test_empty_command_text_rejected() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());

    let err = client.command("   ").execute().await.unwrap_err();

    assert!(err.is_configuration());
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let driver = Arc::new(InMemoryTestDriver::new().with_open_failure("refused"));
    let client = DbKitClient::with_factory(driver.clone());

    let err = client.command("SELECT 1").execute().await.unwrap_err();

    assert!(matches!(err, DbKitError::ConnectionFailed(msg) if msg == "refused"));
    assert_eq!(driver.open_connections(), 0);
    driver.assert_command_count(0);
}

#[tokio::test]
async fn test_execute_failure_closes_connection() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_failure("syntax error"));
    let client = DbKitClient::with_factory(driver.clone());

    let err = client.command("SELEC 1").query().await.unwrap_err();

    assert!(matches!(err, DbKitError::QueryFailed(msg) if msg == "syntax error"));
    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_row_failure_discards_partial_result() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_response(users_response())
            .with_row_failure(1, "network reset"),
    );
    let client = DbKitClient::with_factory(driver.clone());

    let err = client.command("SELECT * FROM users").query().await.unwrap_err();

    assert!(matches!(err, DbKitError::QueryFailed(_)));
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_timeout() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_delay(Duration::from_millis(500)));
    let client = DbKitClient::with_factory(driver.clone());

    let err = client
        .command("SELECT pg_sleep(1)")
        .timeout(Duration::from_millis(20))
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::Timeout(limit) if limit == Duration::from_millis(20)));
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_default_timeout_from_config() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_delay(Duration::from_millis(500)));
    let client = DbKitClient::with_factory(driver.clone()).with_config(
        ExecutorConfig::new().with_default_timeout(Duration::from_millis(20)),
    );

    let err = client.command("SELECT 1").scalar().await.unwrap_err();

    assert!(matches!(err, DbKitError::Timeout(_)));
    assert_eq!(
        driver.last_command().unwrap().command.timeout,
        Some(Duration::from_millis(20))
    );
}

#[tokio::test]
async fn test_cancelled_before_execution() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .command("SELECT 1")
        .cancel_token(cancel)
        .execute()
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn test_cancelled_while_executing() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_delay(Duration::from_secs(5)));
    let client = DbKitClient::with_factory(driver.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = client
        .command("SELECT slow()")
        .cancel_token(cancel)
        .query()
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::Cancelled));
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_dropped_command_closes_its_connection() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_delay(Duration::from_secs(5)));
    let client = DbKitClient::with_factory(driver.clone());

    let outcome = tokio::time::timeout(
        Duration::from_millis(20),
        client.command("SELECT slow()").execute(),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(driver.opens(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        while driver.open_connections() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection was never closed");
    assert_eq!(driver.closes(), 1);
}

#[tokio::test]
async fn test_borrowed_connection_stays_open() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());
    let mut conn = driver.connection();
    conn.open().await.unwrap();

    client.command_on(&mut conn, "SELECT 1").execute().await.unwrap();
    client.command_on(&mut conn, "SELECT 2").execute().await.unwrap();

    assert!(conn.is_open());
    assert_eq!(driver.closes(), 0);
    assert_eq!(driver.connects(), 0);
    let ids: Vec<usize> = driver
        .recorded_commands()
        .iter()
        .map(|r| r.connection_id)
        .collect();
    assert_eq!(ids, vec![conn.id(), conn.id()]);
}

#[tokio::test]
async fn test_borrowed_connection_opened_here_is_closed() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());
    let mut conn = driver.connection();

    client.command_on(&mut conn, "SELECT 1").execute().await.unwrap();

    assert!(!conn.is_open());
    assert_eq!(driver.opens(), 1);
    assert_eq!(driver.closes(), 1);
}

#[tokio::test]
async fn test_borrowed_connection_survives_failure() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_failure("deadlock"));
    let client = DbKitClient::with_factory(driver.clone());
    let mut conn = driver.connection();
    conn.open().await.unwrap();

    let result = client.command_on(&mut conn, "UPDATE t SET x = 1").execute().await;

    assert!(result.is_err());
    assert!(conn.is_open());
}

#[tokio::test]
async fn test_transaction_on_borrowed_connection() {
    let driver = Arc::new(
        InMemoryTestDriver::new()
            .with_response(InMemoryTestResponseBuilder::new().affected(1).build()),
    );
    let client = DbKitClient::with_factory(driver.clone());
    let mut conn = driver.connection();
    conn.open().await.unwrap();

    let tx = conn.begin_transaction().await.unwrap();
    let affected = client
        .command_on(&mut conn, "DELETE FROM users WHERE id = $1")
        .param("id", 1)
        .transaction(tx)
        .execute()
        .await
        .unwrap();
    conn.commit(tx).await.unwrap();

    assert_eq!(affected, 1);
    assert_eq!(
        driver.last_command().unwrap().command.transaction,
        Some(tx)
    );
    assert_eq!(driver.transaction_log(), vec!["BEGIN 0", "COMMIT 0"]);
}

#[tokio::test]
async fn test_transaction_requires_borrowed_connection() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let client = DbKitClient::with_factory(driver.clone());
    let mut conn = driver.connection();
    conn.open().await.unwrap();
    let tx = conn.begin_transaction().await.unwrap();

    let err = client
        .command("DELETE FROM users")
        .transaction(tx)
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, DbKitError::InvalidArgument(_)));
    assert_eq!(driver.connects(), 0);
}

#[tokio::test]
async fn test_pool_reuses_connection() {
    let driver = Arc::new(InMemoryTestDriver::new());
    let pool = Arc::new(ConnectionPool::new(driver.clone(), 2));
    let client = DbKitClient::with_pool(Arc::clone(&pool));

    client.command("SELECT 1").execute().await.unwrap();
    client.command("SELECT 2").execute().await.unwrap();

    assert_eq!(driver.connects(), 1);
    assert_eq!(driver.opens(), 1);
    assert_eq!(pool.idle_count().await, 1);
    let recorded = driver.recorded_commands();
    assert_eq!(recorded[0].connection_id, recorded[1].connection_id);

    pool.clear().await.unwrap();
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_pool_discards_failed_connection() {
    let driver = Arc::new(InMemoryTestDriver::new().with_execute_failure("broken pipe"));
    let pool = Arc::new(ConnectionPool::new(driver.clone(), 2));
    let client = DbKitClient::with_pool(Arc::clone(&pool));

    assert!(client.command("SELECT 1").execute().await.is_err());

    assert_eq!(pool.idle_count().await, 0);
    assert_eq!(driver.open_connections(), 0);
}

#[tokio::test]
async fn test_executor_with_descriptor() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let executor = CommandExecutor::default();
    let descriptor = CommandDescriptor::new(
        ConnectionSource::Factory(driver.clone()),
        "SELECT * FROM users WHERE id > $1",
    )
    .with_parameter(Parameter::new("$min", 0i64))
    .unwrap();

    let result = executor
        .query(
            descriptor,
            &ColumnSelection::ordinals([1]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.columns(), ["name"]);
    assert_eq!(
        result.into_rows(),
        vec![
            vec![Value::Text("Alice".to_string())],
            vec![Value::Text("Bob".to_string())],
        ]
    );
}

#[tokio::test]
async fn test_with_cursor_reads_live_rows() {
    let driver = Arc::new(InMemoryTestDriver::new().with_response(users_response()));
    let executor = CommandExecutor::default();
    let descriptor =
        CommandDescriptor::new(ConnectionSource::Factory(driver.clone()), "SELECT * FROM users");

    let names = executor
        .with_cursor(descriptor, &CancellationToken::new(), |cursor| {
            Box::pin(async move {
                let mut names = Vec::new();
                while cursor.advance().await? {
                    names.push(cursor.value(1)?);
                }
                Ok(names)
            })
        })
        .await
        .unwrap();

    assert_eq!(names.len(), 2);
    assert_eq!(driver.open_connections(), 0);
}
