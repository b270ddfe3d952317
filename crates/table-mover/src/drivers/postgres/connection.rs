//! PostgreSQL connection over `tokio-postgres`.

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Config as PgConfig, NoTls, Portal, Transaction};
use tracing::{debug, warn};

use super::params::{decode_value, PgParam};
use crate::config::ConnectionConfig;
use crate::core::{ColumnMeta, DbConnection, Row, RowCursor};
use crate::dialect::Dialect;
use crate::drivers::common::{strip_jdbc, take_query_param, SslMode, TlsBuilder};
use crate::error::{MoverError, Result};

const DESCRIBE_SQL: &str = r#"
    SELECT
        column_name::text,
        udt_name::text,
        COALESCE(character_maximum_length, numeric_precision, 0)::int8,
        COALESCE(numeric_scale, 0)::int8
    FROM information_schema.columns
    WHERE table_schema = COALESCE(NULLIF($1, ''), current_schema())
      AND table_name = $2
    ORDER BY ordinal_position
"#;

/// One PostgreSQL session.
///
/// With autocommit off a `BEGIN` is issued lazily before the first write
/// and closed by [`commit`](DbConnection::commit) or
/// [`rollback`](DbConnection::rollback).
pub struct PgConnection {
    client: Client,
    autocommit: bool,
    in_transaction: bool,
}

impl PgConnection {
    /// Connect with a `postgres://`, `postgresql://` or `jdbc:postgresql:` URL.
    ///
    /// `sslmode` is read from the URL query; user and password from the
    /// configuration override those in the URL.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let (url, ssl_mode) = take_query_param(strip_jdbc(&config.url), "sslmode");
        let ssl_mode = SslMode::parse(ssl_mode.as_deref().unwrap_or(""))?;

        let mut pg_config: PgConfig = url
            .parse()
            .map_err(|e| MoverError::Config(format!("invalid PostgreSQL URL: {}", e)))?;
        if !config.user.is_empty() {
            pg_config.user(&config.user);
        }
        if !config.password.is_empty() {
            pg_config.password(&config.password);
        }

        let client = match TlsBuilder::new(ssl_mode).build()? {
            Some(tls) => {
                let (client, connection) = pg_config.connect(tls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed: {}", e);
                    }
                });
                client
            }
            None => {
                let (client, connection) = pg_config.connect(NoTls).await?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection closed: {}", e);
                    }
                });
                client
            }
        };

        debug!("Connected to PostgreSQL (sslmode={:?})", ssl_mode);
        Ok(Self {
            client,
            autocommit: true,
            in_transaction: false,
        })
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.autocommit && !self.in_transaction {
            self.client.batch_execute("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn end_transaction(&mut self, statement: &str) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.client.batch_execute(statement).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl DbConnection for PgConnection {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.end_transaction("COMMIT").await?;
        }
        self.autocommit = enabled;
        Ok(())
    }

    async fn max_connections(&mut self) -> Result<u32> {
        let row = self
            .client
            .query_one("SELECT current_setting('max_connections')::int4", &[])
            .await?;
        Ok(row.get::<_, i32>(0).max(0) as u32)
    }

    async fn query_count(&mut self, sql: &str) -> Result<u64> {
        let row = self.client.query_one(sql, &[]).await?;
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        let rows = self.client.query(DESCRIBE_SQL, &[&schema, &table]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let precision: i64 = row.get(2);
                ColumnMeta::new(
                    Dialect::PostgreSql,
                    row.get::<_, String>(0),
                    &row.get::<_, String>(1),
                    precision,
                )
                .with_scale(row.get(3))
            })
            .collect())
    }

    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        _columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        // Portals need their own transaction.
        if self.in_transaction {
            debug!("Committing open transaction before opening a cursor");
            self.end_transaction("COMMIT").await?;
        }

        let tx = self.client.transaction().await?;
        let statement = tx.prepare(sql).await?;
        let columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let portal = tx.bind(&statement, &[]).await?;

        Ok(Box::new(PgCursor {
            tx,
            portal,
            columns,
            fetch_size: i32::try_from(fetch_size.max(1)).unwrap_or(i32::MAX),
            exhausted: false,
        }))
    }

    async fn execute_batch(&mut self, sql: &str, _columns: &[ColumnMeta], rows: &[Row]) -> Result<u64> {
        self.begin_if_needed().await?;
        let statement = self.client.prepare(sql).await?;

        let params: Vec<Vec<PgParam<'_>>> = rows
            .iter()
            .map(|row| row.iter().map(PgParam).collect())
            .collect();
        let refs: Vec<Vec<&(dyn ToSql + Sync)>> = params
            .iter()
            .map(|row| row.iter().map(|p| p as &(dyn ToSql + Sync)).collect())
            .collect();

        // Pipelined: all rows are sent before the first reply is awaited.
        let client = &self.client;
        let statement = &statement;
        let counts = try_join_all(refs.iter().map(|row| client.execute(statement, row.as_slice()))).await?;
        Ok(counts.iter().sum())
    }

    async fn commit(&mut self) -> Result<()> {
        self.end_transaction("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.end_transaction("ROLLBACK").await
    }

    async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?;
        Ok(())
    }
}

/// Portal-backed cursor; the read transaction is rolled back on drop.
struct PgCursor<'a> {
    tx: Transaction<'a>,
    portal: Portal,
    columns: Vec<String>,
    fetch_size: i32,
    exhausted: bool,
}

#[async_trait]
impl RowCursor for PgCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>> {
        if self.exhausted {
            return Ok(None);
        }

        let rows = self.tx.query_portal(&self.portal, self.fetch_size).await?;
        if rows.len() < self.fetch_size as usize {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = (0..row.len())
                .map(|i| decode_value(row, i))
                .collect::<Result<Row>>()?;
            chunk.push(values);
        }
        Ok(Some(chunk))
    }
}
