use thiserror::Error;

/// Error type for dbkit operations
#[derive(Debug, Error)]
pub enum DbKitError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Column ordinal {ordinal} out of range ({field_count} field(s))")]
    OrdinalOutOfRange { ordinal: usize, field_count: usize },

    #[error("Cannot convert column '{column}' from {found} to {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Operation not supported by driver: {0}")]
    Unsupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Stream producer task failed: {0}")]
    StreamTaskFailed(String),
}

impl DbKitError {
    /// True for errors raised by argument or schema validation, before or
    /// instead of talking to the driver.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DbKitError::InvalidArgument(_)
                | DbKitError::DuplicateParameter(_)
                | DbKitError::ColumnNotFound(_)
                | DbKitError::OrdinalOutOfRange { .. }
                | DbKitError::TypeMismatch { .. }
                | DbKitError::UnexpectedRowCount { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, DbKitError::Cancelled)
    }
}

/// Result type alias for dbkit operations
pub type Result<T> = std::result::Result<T, DbKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(DbKitError::ColumnNotFound("x".into()).is_configuration());
        assert!(DbKitError::DuplicateParameter("@id".into()).is_configuration());
        assert!(!DbKitError::QueryFailed("boom".into()).is_configuration());
        assert!(DbKitError::Cancelled.is_cancellation());
        assert!(!DbKitError::Cancelled.is_configuration());
    }

    #[test]
    fn test_error_display() {
        let err = DbKitError::OrdinalOutOfRange {
            ordinal: 3,
            field_count: 2,
        };
        assert_eq!(err.to_string(), "Column ordinal 3 out of range (2 field(s))");
    }
}
