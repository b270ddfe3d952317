//! Error types for the table mover.

use thiserror::Error;

use crate::dialect::Dialect;

/// Main error type for export, import and copy runs.
#[derive(Error, Debug)]
pub enum MoverError {
    /// Configuration error (missing file, malformed value, failed validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Could not open a connection for one side of the run
    #[error("Connection error ({key}): {message}")]
    Connection { key: String, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Statement or driver error reported by a database
    #[error("{dialect} error: {message}")]
    Database { dialect: Dialect, message: String },

    /// A single row could not be encoded or decoded
    #[error("Row codec error in {table}: {message}\n  Row: {row}")]
    Codec {
        table: String,
        row: String,
        message: String,
    },

    /// Operation kept failing after every allowed attempt
    #[error("{operation} failed after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<MoverError>,
    },

    /// Page workers of a table processed fewer windows than were published
    #[error("Table {table} failed: {actual} of {expected} pages processed")]
    TableFailed {
        table: String,
        expected: usize,
        actual: usize,
    },

    /// Feature or driver not available in this build
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// IO error (CSV and sidecar files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV tokenizer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MoverError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MoverError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Connection error for a pool key
    pub fn connection(key: impl ToString, message: impl ToString) -> Self {
        MoverError::Connection {
            key: key.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a Database error tagged with the dialect that produced it
    pub fn database(dialect: Dialect, message: impl ToString) -> Self {
        MoverError::Database {
            dialect,
            message: message.to_string(),
        }
    }

    /// Create a Codec error carrying the offending row text
    pub fn codec(
        table: impl Into<String>,
        row: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        MoverError::Codec {
            table: table.into(),
            row: row.into(),
            message: message.to_string(),
        }
    }

    /// Wrap the last failure of a retried operation
    pub fn retry_exhausted(operation: impl Into<String>, attempts: u32, last: MoverError) -> Self {
        MoverError::RetryExhausted {
            operation: operation.into(),
            attempts,
            source: Box::new(last),
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            MoverError::Config(_) | MoverError::Yaml(_) => 1,
            MoverError::Connection { .. } | MoverError::Pool { .. } => 2,
            MoverError::Database { .. } => 3,
            MoverError::Codec { .. } | MoverError::Csv(_) => 4,
            MoverError::RetryExhausted { .. } => 5,
            MoverError::TableFailed { .. } => 6,
            MoverError::Io(_) => 7,
            MoverError::Unsupported(_) | MoverError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

impl From<tokio_postgres::Error> for MoverError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Server errors carry the SQLSTATE message; the Display impl only says "db error".
        let message = match e.as_db_error() {
            Some(db) => format!("{}: {}", db.code().code(), db.message()),
            None => e.to_string(),
        };
        MoverError::database(Dialect::PostgreSql, message)
    }
}

impl From<tiberius::error::Error> for MoverError {
    fn from(e: tiberius::error::Error) -> Self {
        MoverError::database(Dialect::MsSql, e)
    }
}

impl From<mysql_async::Error> for MoverError {
    fn from(e: mysql_async::Error) -> Self {
        MoverError::database(Dialect::MySql, e)
    }
}

#[cfg(feature = "odbc")]
impl From<odbc_api::Error> for MoverError {
    fn from(e: odbc_api::Error) -> Self {
        MoverError::database(Dialect::Other, e)
    }
}

/// Result type alias for table mover operations.
pub type Result<T> = std::result::Result<T, MoverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detailed_walks_retry_chain() {
        let last = MoverError::connection("SOURCE", "connection refused");
        let err = MoverError::retry_exhausted("lease SOURCE connection", 30, last);

        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: lease SOURCE connection failed after 30 attempts"));
        assert!(detailed.contains("Caused by:\n  1: Connection error (SOURCE): connection refused"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MoverError::Config("x".into()).exit_code(), 1);
        assert_eq!(
            MoverError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")).exit_code(),
            7
        );
        assert_eq!(
            MoverError::TableFailed {
                table: "T1".into(),
                expected: 3,
                actual: 2
            }
            .exit_code(),
            6
        );
    }

    #[test]
    fn test_codec_error_carries_row() {
        let err = MoverError::codec("S.T1", "1,abc", "invalid digit found in string");
        let text = err.to_string();
        assert!(text.contains("S.T1"));
        assert!(text.contains("Row: 1,abc"));
    }
}
