//! The driver seam: what the engine needs from a database connection.
//!
//! - [`DbConnection`]: one live session with autocommit, cursors and batches
//! - [`RowCursor`]: a forward-only result set fetched in chunks
//! - [`Connector`]: opens connections for a [`PoolKey`]
//!
//! Every driver module (`drivers/postgres`, `drivers/mssql`, ...) implements
//! these traits; the pipelines and workers never see a driver type.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::dialect::Dialect;
use crate::error::Result;

use super::schema::ColumnMeta;
use super::value::Row;

/// Logical role of a connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolKey {
    Source,
    Destination,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PoolKey::Source => "SOURCE",
            PoolKey::Destination => "DESTINATION",
        })
    }
}

/// Native LOB binding capabilities advertised by a destination.
///
/// A destination without native support receives LOB values as plain
/// byte or character streams instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LobSupport {
    pub blob: bool,
    pub clob: bool,
}

/// Forward-only result set.
#[async_trait]
pub trait RowCursor: Send {
    /// Result column names in select order.
    fn columns(&self) -> &[String];

    /// Next chunk of at most the cursor's fetch size, `None` once exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>>;
}

/// One live database session.
#[async_trait]
pub trait DbConnection: Send {
    /// Dialect, computed once when the connection was opened.
    fn dialect(&self) -> Dialect;

    fn lob_support(&self) -> LobSupport {
        LobSupport::default()
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()>;

    /// Server-side connection limit; 0 means unlimited or unknown.
    async fn max_connections(&mut self) -> Result<u32>;

    /// Run a single-value count query.
    async fn query_count(&mut self, sql: &str) -> Result<u64>;

    /// Physical columns of a table in ordinal order.
    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>>;

    /// Execute a SELECT and stream it back in chunks of `fetch_size` rows.
    ///
    /// `columns` describes the table being read, so values can be decoded
    /// by type family rather than by wire type alone.
    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>>;

    /// Execute a parameterised statement once per row; returns rows affected.
    async fn execute_batch(&mut self, sql: &str, columns: &[ColumnMeta], rows: &[Row])
        -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Cheap round trip used as the pool health check.
    async fn ping(&mut self) -> Result<()>;
}

/// Opens connections for one side of a run.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, key: PoolKey) -> Result<Box<dyn DbConnection>>;
}
