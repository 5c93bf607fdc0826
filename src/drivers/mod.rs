mod tokio_postgres;

pub use self::in_memory_test::{
    InMemoryConnection, InMemoryCursor, InMemoryTestDriver, InMemoryTestResponseBuilder,
    RawQueryResult, RecordedCommand,
};
pub use self::tokio_postgres::{TokioPostgresConnection, TokioPostgresFactory};
