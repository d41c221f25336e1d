//! Error types for the table/view engine.
//!
//! Every fallible operation returns [`Result`]. Errors are reported
//! synchronously to the caller of the operation that triggered them and no
//! operation is retried internally.

use crate::column::ColumnType;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by tables, views and the input normalization layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Bad or missing schema, unknown type token, or bad table options.
    #[error("schema error: {0}")]
    Schema(String),

    /// An update referenced a column the table does not have.
    #[error("column '{column}' does not exist in table '{table}'")]
    ColumnMismatch { table: String, column: String },

    /// A keyed operation was attempted on a table without an index.
    #[error("table '{table}' has no index column; {operation} requires one")]
    Index { table: String, operation: String },

    /// The view or table has been released (or its table has).
    #[error("{0} has been released")]
    StaleView(String),

    /// The object was already released; the repeated release is ignored.
    #[error("{0} was already released")]
    InUse(String),

    /// A value cannot be stored in a column of the given type.
    #[error("column '{column}' expects {expected}, got {found}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        found: String,
    },

    /// A view configuration is not valid for the table's schema.
    #[error("invalid view configuration: {0}")]
    InvalidConfig(String),

    /// JSON or CSV input could not be read.
    #[error("parse error: {0}")]
    Parse(String),
}

impl Error {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Error::Parse(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::ColumnMismatch {
            table: "trades".to_string(),
            column: "venue".to_string(),
        };
        assert_eq!(err.to_string(), "column 'venue' does not exist in table 'trades'");

        let err = Error::TypeMismatch {
            column: "qty".to_string(),
            expected: ColumnType::Integer,
            found: "string \"ten\"".to_string(),
        };
        assert_eq!(err.to_string(), "column 'qty' expects integer, got string \"ten\"");
    }

    #[test]
    fn test_json_error_becomes_parse_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Parse(_)));
    }
}
