//! Identifier validation for names that end up interpolated into SQL.
//!
//! Table and schema names come from plain-text configuration and cannot be
//! bound as parameters, so they are checked once at load time.

use crate::error::{MoverError, Result};

/// Conservative limit across the supported databases (SQL Server allows 128).
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Reject names that cannot be safely placed in a statement.
///
/// Empty names, embedded NUL bytes, statement separators and names over
/// the length limit are refused.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MoverError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(MoverError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.contains(';') || name.contains("--") {
        return Err(MoverError::Config(format!(
            "Identifier contains a statement separator or comment: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MoverError::Config(format!(
            "Identifier exceeds {} bytes (got {}): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}
