//! Configuration type definitions.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MoverError;

/// What a run does with the configured tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Database to CSV files.
    Export,
    /// CSV files to database.
    Import,
    /// Database to database.
    Copy,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Export => "EXPORT",
            Mode::Import => "IMPORT",
            Mode::Copy => "COPY",
        }
    }

    /// Whether the run reads from the source database.
    pub fn uses_source(self) -> bool {
        matches!(self, Mode::Export | Mode::Copy)
    }

    /// Whether the run writes to the destination database.
    pub fn uses_destination(self) -> bool {
        matches!(self, Mode::Import | Mode::Copy)
    }

    /// Whether the run reads or writes CSV files under `path`.
    pub fn uses_files(self) -> bool {
        matches!(self, Mode::Export | Mode::Import)
    }
}

impl FromStr for Mode {
    type Err = MoverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXPORT" => Ok(Mode::Export),
            "IMPORT" => Ok(Mode::Import),
            "COPY" => Ok(Mode::Copy),
            other => Err(MoverError::Config(format!(
                "operation must be one of EXPORT, IMPORT, COPY, got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a run. Immutable once loaded.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connection URL; the prefix selects the driver.
    #[serde(default)]
    pub url: String,

    /// Schema qualifying every table name; empty means unqualified.
    #[serde(default)]
    pub schema: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("schema", &self.schema)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Tuning knobs from `process-config.properties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProcessConfig {
    /// Upper bound on concurrent leases per pool key.
    pub max_connections: u32,

    /// Rows per page window.
    pub page_size: u64,

    pub parallel_tables: usize,

    /// Page workers per paginated table.
    pub parallel_pages: usize,

    /// Rows per cursor round trip.
    pub fetch_size: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            page_size: 100_000,
            parallel_tables: 5,
            parallel_pages: 40,
            fetch_size: 50_000,
        }
    }
}

/// Everything a run needs, from either the properties files or YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub operation: Mode,

    #[serde(default)]
    pub source: ConnectionConfig,

    #[serde(default)]
    pub destination: ConnectionConfig,

    /// Directory holding the CSV files.
    #[serde(default)]
    pub path: PathBuf,

    #[serde(default)]
    pub process: ProcessConfig,

    /// Tables to move, in dispatch order.
    #[serde(default)]
    pub tables: Vec<String>,
}

impl Config {
    /// The explicit configuration value threaded through the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: self.operation,
            source: self.source.clone(),
            destination: self.destination.clone(),
            path: self.path.clone(),
            page_size: self.process.page_size,
            parallel_tables: self.process.parallel_tables,
            parallel_pages: self.process.parallel_pages,
            max_connections: self.process.max_connections,
            fetch_size: self.process.fetch_size,
        }
    }
}

/// Engine settings for a single run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: Mode,
    pub source: ConnectionConfig,
    pub destination: ConnectionConfig,
    pub path: PathBuf,
    pub page_size: u64,
    pub parallel_tables: usize,
    pub parallel_pages: usize,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl EngineConfig {
    /// Rows between flushes (and import batch executions).
    pub fn flush_interval(&self) -> u64 {
        (self.page_size / 100).max(1)
    }
}
