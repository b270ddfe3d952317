//! Database dialect classification and SQL generation.
//!
//! A [`Dialect`] is computed once per connection and cached on the
//! connection handle. Native drivers know their dialect from the URL
//! scheme; ODBC connections classify themselves from the DBMS name the
//! driver reports.

mod sql;

pub use sql::SqlGenerator;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Database vendor classification used to pick SQL syntax and value accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Oracle,
    PostgreSql,
    MySql,
    MsSql,
    H2,
    /// Reachable, but no pagination syntax is known for it.
    Other,
}

/// URL prefixes recognised by the detector, longest match first.
const URL_PREFIXES: &[(&str, Dialect)] = &[
    ("jdbc:postgresql:", Dialect::PostgreSql),
    ("postgresql://", Dialect::PostgreSql),
    ("postgres://", Dialect::PostgreSql),
    ("jdbc:sqlserver:", Dialect::MsSql),
    ("sqlserver://", Dialect::MsSql),
    ("mssql://", Dialect::MsSql),
    ("jdbc:mysql:", Dialect::MySql),
    ("mysql://", Dialect::MySql),
    ("jdbc:oracle:", Dialect::Oracle),
    ("oracle://", Dialect::Oracle),
    ("jdbc:h2:", Dialect::H2),
];

impl Dialect {
    /// Classify a connection URL by its prefix.
    ///
    /// Returns `None` for `odbc:` URLs (classified after connecting) and for
    /// anything unrecognised.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.trim().to_ascii_lowercase();
        URL_PREFIXES
            .iter()
            .find(|(prefix, _)| lower.starts_with(prefix))
            .map(|(_, dialect)| *dialect)
    }

    /// Classify the DBMS name reported by a live ODBC connection.
    pub fn from_dbms_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("oracle") {
            Dialect::Oracle
        } else if lower.contains("postgres") {
            Dialect::PostgreSql
        } else if lower.contains("mysql") || lower.contains("mariadb") {
            Dialect::MySql
        } else if lower.contains("sql server") {
            Dialect::MsSql
        } else if lower.starts_with("h2") {
            Dialect::H2
        } else {
            Dialect::Other
        }
    }

    /// Whether schema and table names are wrapped in double quotes.
    pub fn quotes_identifiers(self) -> bool {
        matches!(self, Dialect::PostgreSql | Dialect::MsSql)
    }

    /// Whether a paginated SELECT can be generated for this dialect.
    pub fn supports_pagination(self) -> bool {
        !matches!(self, Dialect::Other)
    }

    /// Bind parameter placeholder for this dialect (1-indexed).
    pub fn param_placeholder(self, index: usize) -> String {
        match self {
            Dialect::PostgreSql => format!("${}", index),
            Dialect::MsSql => format!("@P{}", index),
            _ => "?".to_string(),
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Dialect::Oracle => "Oracle",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::MsSql => "MSSQL",
            Dialect::H2 => "H2",
            Dialect::Other => "Other",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        assert_eq!(
            Dialect::from_url("postgres://localhost/db"),
            Some(Dialect::PostgreSql)
        );
        assert_eq!(
            Dialect::from_url("jdbc:postgresql://localhost:5432/db"),
            Some(Dialect::PostgreSql)
        );
        assert_eq!(
            Dialect::from_url("jdbc:sqlserver://host:1433;databaseName=db"),
            Some(Dialect::MsSql)
        );
        assert_eq!(Dialect::from_url("mysql://u@host/db"), Some(Dialect::MySql));
        assert_eq!(
            Dialect::from_url("jdbc:oracle:thin:@host:1521:XE"),
            Some(Dialect::Oracle)
        );
        assert_eq!(Dialect::from_url("JDBC:H2:mem:test"), Some(Dialect::H2));
        assert_eq!(Dialect::from_url("odbc:DSN=warehouse"), None);
        assert_eq!(Dialect::from_url("sqlite://file.db"), None);
    }

    #[test]
    fn test_from_dbms_name() {
        assert_eq!(Dialect::from_dbms_name("Oracle"), Dialect::Oracle);
        assert_eq!(
            Dialect::from_dbms_name("Microsoft SQL Server"),
            Dialect::MsSql
        );
        assert_eq!(Dialect::from_dbms_name("PostgreSQL"), Dialect::PostgreSql);
        assert_eq!(Dialect::from_dbms_name("MySQL"), Dialect::MySql);
        assert_eq!(Dialect::from_dbms_name("H2"), Dialect::H2);
        assert_eq!(Dialect::from_dbms_name("DB2/LINUXX8664"), Dialect::Other);
    }

    #[test]
    fn test_param_placeholder() {
        assert_eq!(Dialect::PostgreSql.param_placeholder(3), "$3");
        assert_eq!(Dialect::MsSql.param_placeholder(1), "@P1");
        assert_eq!(Dialect::Oracle.param_placeholder(2), "?");
        assert_eq!(Dialect::MySql.param_placeholder(2), "?");
    }

    #[test]
    fn test_quoting_discipline() {
        assert!(Dialect::PostgreSql.quotes_identifiers());
        assert!(Dialect::MsSql.quotes_identifiers());
        assert!(!Dialect::Oracle.quotes_identifiers());
        assert!(!Dialect::MySql.quotes_identifiers());
        assert!(!Dialect::H2.quotes_identifiers());
    }
}
