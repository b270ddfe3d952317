//! Configuration validation.

use super::{Config, ConnectionConfig};
use crate::core::validate_identifier;
use crate::error::{MoverError, Result};

/// Validate the configuration for the selected operation.
pub fn validate(config: &Config) -> Result<()> {
    let mode = config.operation;

    if mode.uses_source() {
        validate_side("source", &config.source)?;
    }
    if mode.uses_destination() {
        validate_side("destination", &config.destination)?;
    }

    if mode.uses_files() && config.path.as_os_str().is_empty() {
        return Err(MoverError::Config(format!(
            "path is required for {}",
            mode
        )));
    }

    let process = &config.process;
    if process.page_size == 0 {
        return Err(MoverError::Config("page-size must be at least 1".into()));
    }
    if process.parallel_tables == 0 {
        return Err(MoverError::Config(
            "parallel-tables must be at least 1".into(),
        ));
    }
    if process.parallel_pages == 0 {
        return Err(MoverError::Config("parallel-pages must be at least 1".into()));
    }
    if process.max_connections == 0 {
        return Err(MoverError::Config(
            "max-connections must be at least 1".into(),
        ));
    }
    if process.fetch_size == 0 {
        return Err(MoverError::Config("fetch-size must be at least 1".into()));
    }

    for table in &config.tables {
        validate_identifier(table)?;
    }

    Ok(())
}

fn validate_side(name: &str, side: &ConnectionConfig) -> Result<()> {
    if side.url.trim().is_empty() {
        return Err(MoverError::Config(format!("{}.url is required", name)));
    }
    if !side.schema.is_empty() {
        validate_identifier(&side.schema)?;
    }
    Ok(())
}
