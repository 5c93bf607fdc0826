use std::time::Duration;

use crate::types::Parameters;

/// How the driver should interpret the command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Text,
    /// The text is the name of a stored procedure; parameters are its arguments.
    StoredProcedure,
}

/// Opaque token for a transaction opened on a connection.
/// Issued by [`Connection::begin_transaction`](crate::traits::Connection::begin_transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub u64);

/// A fully bound command, handed to the driver for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub text: String,
    pub timeout: Option<Duration>,
    pub parameters: Parameters,
    pub transaction: Option<TransactionHandle>,
}

impl Command {
    pub fn new(kind: CommandKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timeout: None,
            parameters: Parameters::new(),
            transaction: None,
        }
    }
}
