//! dbkit - async command execution and result materialization over pluggable
//! database drivers
//!
//! # Example
//! ```ignore
//! use dbkit::DbKitClient;
//!
//! let client = DbKitClient::connect("postgres://localhost/mydb")?;
//!
//! // Buffer a whole result
//! let row = client
//!     .command("SELECT id, name FROM users WHERE name = $1")
//!     .param("name", "John")
//!     .query()
//!     .await?
//!     .single_row()?;
//! let id: i32 = row.get_as("id")?;
//!
//! // Or stream it with backpressure
//! let mut stream = client.command("SELECT id, name FROM users").stream()?;
//! while let Some(record) = stream.next_record().await {
//!     println!("{:?}", record?.get("name")?);
//! }
//! stream.join().await?;
//! ```

pub mod builders;
pub mod config;
pub mod drivers;
pub mod error;
pub mod executor;
pub mod materialize;
pub mod pool;
pub mod streaming;
pub mod traits;
pub mod types;

mod client;

// Re-export main types for convenient access
pub use builders::CommandBuilder;
pub use client::DbKitClient;
pub use config::ExecutorConfig;
pub use error::{DbKitError, Result};
pub use executor::{CommandDescriptor, CommandExecutor, ConnectionSource};
pub use materialize::{ColumnMapping, ColumnSelection, FieldOverrides, QueryResult};
pub use pool::ConnectionPool;
pub use streaming::{BridgeState, BridgeStatus, RowStream};
pub use traits::{Connection, ConnectionFactory, Entity, EntityMap, RowCursor};
pub use types::{
    Command, CommandKind, FromValue, ParamType, Parameter, Record, TransactionHandle, Value,
};
