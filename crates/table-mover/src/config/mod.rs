//! Configuration loading and validation.
//!
//! A run is configured either by three plain-text files in one directory
//! (`db-config.properties`, `process-config.properties`, `tables.config`)
//! or by a single YAML document carrying the same values.

mod properties;
mod types;
mod validation;

pub use properties::Properties;
pub use types::*;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::Result;

pub const DB_CONFIG_FILE: &str = "db-config.properties";
pub const PROCESS_CONFIG_FILE: &str = "process-config.properties";
pub const TABLES_FILE: &str = "tables.config";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the three properties-style files from `dir`.
    ///
    /// `db-config.properties` must exist. A missing process file falls back
    /// to defaults and a missing table list is created empty.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();

        let db = Properties::load(&dir.join(DB_CONFIG_FILE))?;
        let operation: Mode = db.require("operation")?.parse()?;

        let config = Config {
            operation,
            source: connection_from(&db, "source"),
            destination: connection_from(&db, "destination"),
            path: PathBuf::from(db.get_or_empty("path")),
            process: load_process_config(&dir.join(PROCESS_CONFIG_FILE))?,
            tables: load_tables(&dir.join(TABLES_FILE))?,
        };
        config.validate()?;

        info!(
            "Loaded {} configuration from {} ({} tables)",
            config.operation,
            dir.display(),
            config.tables.len()
        );
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn connection_from(props: &Properties, prefix: &str) -> ConnectionConfig {
    let key = |name: &str| format!("{}.{}", prefix, name);
    ConnectionConfig {
        url: props.get_or_empty(&key("url")),
        schema: props.get_or_empty(&key("schema")),
        user: props.get_or_empty(&key("user")),
        password: props.get_or_empty(&key("password")),
    }
}

/// Read `process-config.properties`, falling back to defaults when the
/// file cannot be read. Unparsable numbers are still an error.
pub fn load_process_config(path: &Path) -> Result<ProcessConfig> {
    let props = match Properties::load(path) {
        Ok(props) => props,
        Err(e) => {
            warn!(
                "Could not read {} ({}), using default process settings",
                path.display(),
                e
            );
            return Ok(ProcessConfig::default());
        }
    };

    let defaults = ProcessConfig::default();
    Ok(ProcessConfig {
        max_connections: props
            .parse_value("max-connections")?
            .unwrap_or(defaults.max_connections),
        page_size: props.parse_value("page-size")?.unwrap_or(defaults.page_size),
        parallel_tables: props
            .parse_value("parallel-tables")?
            .unwrap_or(defaults.parallel_tables),
        parallel_pages: props
            .parse_value("parallel-pages")?
            .unwrap_or(defaults.parallel_pages),
        fetch_size: props
            .parse_value("fetch-size")?
            .unwrap_or(defaults.fetch_size),
    })
}

/// Read the table list, creating an empty file when it does not exist.
pub fn load_tables(path: &Path) -> Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(parse_tables(&text)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("{} not found, creating an empty table list", path.display());
            std::fs::write(path, "")?;
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// One table per line; blank lines and `#` comments are skipped.
pub fn parse_tables(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MoverError;

    fn write(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    const DB_CONFIG: &str = "\
operation=EXPORT
source.url=postgres://localhost:5432/app
source.schema=S
source.user=app
source.password=secret
path=/tmp/export
";

    #[test]
    fn test_from_dir_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), DB_CONFIG_FILE, DB_CONFIG);
        write(dir.path(), TABLES_FILE, "# nightly\nT1\n\n  T2  \n");

        let config = Config::from_dir(dir.path()).unwrap();
        assert_eq!(config.operation, Mode::Export);
        assert_eq!(config.source.schema, "S");
        assert_eq!(config.path, PathBuf::from("/tmp/export"));
        assert_eq!(config.process, ProcessConfig::default());
        assert_eq!(config.tables, vec!["T1", "T2"]);
    }

    #[test]
    fn test_process_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), DB_CONFIG_FILE, DB_CONFIG);
        write(
            dir.path(),
            PROCESS_CONFIG_FILE,
            "max-connections=8\npage-size=1000\nparallel-tables=2\nparallel-pages=4\n",
        );

        let config = Config::from_dir(dir.path()).unwrap();
        assert_eq!(config.process.max_connections, 8);
        assert_eq!(config.process.page_size, 1000);
        assert_eq!(config.process.parallel_tables, 2);
        assert_eq!(config.process.parallel_pages, 4);
        assert_eq!(config.process.fetch_size, 50_000);
    }

    #[test]
    fn test_bad_process_number_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), DB_CONFIG_FILE, DB_CONFIG);
        write(dir.path(), PROCESS_CONFIG_FILE, "page-size=big\n");

        let err = Config::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, MoverError::Config(_)));
    }

    #[test]
    fn test_missing_tables_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), DB_CONFIG_FILE, DB_CONFIG);

        let config = Config::from_dir(dir.path()).unwrap();
        assert!(config.tables.is_empty());
        assert!(dir.path().join(TABLES_FILE).exists());
    }

    #[test]
    fn test_missing_db_config_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_dir(dir.path()).unwrap_err();
        assert!(matches!(err, MoverError::Io(_)));
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_bad_operation() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), DB_CONFIG_FILE, "operation=MIGRATE\n");
        let err = Config::from_dir(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
operation: COPY
source:
  url: jdbc:oracle:thin:@ora:1521:XE
  schema: S
destination:
  url: postgres://pg/warehouse
  schema: D
process:
  page-size: 500
  parallel-pages: 2
tables: [T1, T2]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.operation, Mode::Copy);
        assert_eq!(config.process.page_size, 500);
        assert_eq!(config.process.parallel_pages, 2);
        assert_eq!(config.process.parallel_tables, 5);
        assert_eq!(config.tables.len(), 2);

        let engine = config.engine_config();
        assert_eq!(engine.flush_interval(), 5);
    }
}
