//! Database drivers behind the [`DbConnection`](crate::core::DbConnection) seam.
//!
//! - [`postgres`]: `tokio-postgres`, optionally over rustls
//! - [`mssql`]: `tiberius`
//! - [`mysql`]: `mysql_async`
//! - `odbc`: `odbc-api` (feature `odbc`), the route to Oracle and H2
//!
//! [`UrlConnector`] picks the driver from the connection URL of each side.

use async_trait::async_trait;

pub mod common;
pub mod mssql;
pub mod mysql;
#[cfg(feature = "odbc")]
pub mod odbc;
pub mod postgres;

pub use common::{SslMode, TlsBuilder};
pub use mssql::MssqlConnection;
pub use mysql::MySqlConnection;
pub use postgres::PgConnection;

use crate::config::ConnectionConfig;
use crate::core::{Connector, DbConnection, PoolKey};
use crate::error::{MoverError, Result};

/// Native client that serves a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    Mssql,
    MySql,
    Odbc,
}

impl Driver {
    /// Route a connection URL to a driver.
    pub fn for_url(url: &str) -> Result<Self> {
        let lower = url.trim().to_ascii_lowercase();
        let native = lower.strip_prefix("jdbc:").unwrap_or(&lower);

        if native.starts_with("postgres://") || native.starts_with("postgresql:") {
            Ok(Driver::Postgres)
        } else if native.starts_with("sqlserver:") || native.starts_with("mssql://") {
            Ok(Driver::Mssql)
        } else if native.starts_with("mysql:") {
            Ok(Driver::MySql)
        } else if lower.starts_with("odbc:") {
            Ok(Driver::Odbc)
        } else if native.starts_with("oracle:") || native.starts_with("h2:") {
            Err(MoverError::Unsupported(format!(
                "no native driver for '{}'; connect through an 'odbc:' URL instead",
                url
            )))
        } else {
            Err(MoverError::Config(format!("unrecognised connection URL '{}'", url)))
        }
    }
}

/// Open a connection for `config` with the driver its URL selects.
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn DbConnection>> {
    match Driver::for_url(&config.url)? {
        Driver::Postgres => Ok(Box::new(PgConnection::connect(config).await?)),
        Driver::Mssql => Ok(Box::new(MssqlConnection::connect(config).await?)),
        Driver::MySql => Ok(Box::new(MySqlConnection::connect(config).await?)),
        #[cfg(feature = "odbc")]
        Driver::Odbc => Ok(Box::new(odbc::OdbcConnection::connect(config).await?)),
        #[cfg(not(feature = "odbc"))]
        Driver::Odbc => Err(MoverError::Unsupported(
            "ODBC URLs need a build with the 'odbc' feature".into(),
        )),
    }
}

/// [`Connector`] over the configured source and destination.
pub struct UrlConnector {
    source: ConnectionConfig,
    destination: ConnectionConfig,
}

impl UrlConnector {
    pub fn new(source: ConnectionConfig, destination: ConnectionConfig) -> Self {
        Self { source, destination }
    }

    fn config(&self, key: PoolKey) -> &ConnectionConfig {
        match key {
            PoolKey::Source => &self.source,
            PoolKey::Destination => &self.destination,
        }
    }
}

#[async_trait]
impl Connector for UrlConnector {
    async fn connect(&self, key: PoolKey) -> Result<Box<dyn DbConnection>> {
        connect(self.config(key)).await.map_err(|e| match e {
            MoverError::Database { message, .. } => MoverError::connection(key, message),
            MoverError::Io(io) => MoverError::connection(key, io),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_routing() {
        assert_eq!(Driver::for_url("postgres://h/db").unwrap(), Driver::Postgres);
        assert_eq!(Driver::for_url("jdbc:postgresql://h/db").unwrap(), Driver::Postgres);
        assert_eq!(Driver::for_url("postgresql://h/db").unwrap(), Driver::Postgres);
        assert_eq!(Driver::for_url("jdbc:sqlserver://h;databaseName=x").unwrap(), Driver::Mssql);
        assert_eq!(Driver::for_url("mssql://h").unwrap(), Driver::Mssql);
        assert_eq!(Driver::for_url("JDBC:MYSQL://h/db").unwrap(), Driver::MySql);
        assert_eq!(Driver::for_url("odbc:DSN=ora").unwrap(), Driver::Odbc);
    }

    #[test]
    fn test_oracle_and_h2_point_to_odbc() {
        for url in ["jdbc:oracle:thin:@h:1521/x", "jdbc:h2:mem:test", "oracle://h/x"] {
            match Driver::for_url(url) {
                Err(MoverError::Unsupported(msg)) => assert!(msg.contains("odbc:")),
                other => panic!("unexpected routing for {}: {:?}", url, other),
            }
        }
    }

    #[test]
    fn test_unknown_url_is_config_error() {
        assert!(matches!(
            Driver::for_url("redis://localhost"),
            Err(MoverError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_without_url() {
        let connector = UrlConnector::new(ConnectionConfig::default(), ConnectionConfig::default());
        let result = connector.connect(PoolKey::Source).await;
        assert!(matches!(result, Err(MoverError::Config(_))));
    }
}
