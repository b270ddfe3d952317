//! SQL Server connection over `tiberius`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures::stream::BoxStream;
use futures::TryStreamExt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::core::schema::{MSSQL_MAX_NVARCHAR_PRECISION, MSSQL_MAX_VARCHAR_PRECISION};
use crate::core::{ColumnKind, ColumnMeta, DbConnection, LobSupport, Row, RowCursor, SqlValue};
use crate::dialect::Dialect;
use crate::drivers::common::strip_jdbc;
use crate::error::{MoverError, Result};

type TdsClient = Client<Compat<TcpStream>>;

const DESCRIBE_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, \
        CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, 0) AS BIGINT), \
        CAST(COALESCE(NUMERIC_SCALE, 0) AS BIGINT) \
    FROM INFORMATION_SCHEMA.COLUMNS \
    WHERE TABLE_SCHEMA = COALESCE(NULLIF(@P1, ''), SCHEMA_NAME()) AND TABLE_NAME = @P2 \
    ORDER BY ORDINAL_POSITION";

/// One SQL Server session.
pub struct MssqlConnection {
    client: TdsClient,
}

impl MssqlConnection {
    /// Connect with a `sqlserver://`, `mssql://` or `jdbc:sqlserver://` URL
    /// using the JDBC property syntax (`host:port;databaseName=db;...`).
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let mut tds = Config::from_jdbc_string(&jdbc_url(&config.url))
            .map_err(|e| MoverError::Config(format!("invalid SQL Server URL: {}", e)))?;
        if !config.user.is_empty() {
            tds.authentication(AuthMethod::sql_server(&config.user, &config.password));
        }

        let tcp = TcpStream::connect(tds.get_addr()).await?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(tds, tcp.compat_write()).await?;

        debug!("Connected to SQL Server");
        Ok(Self { client })
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.client.execute(sql, &[]).await?;
        Ok(())
    }

    async fn scalar(&mut self, sql: &str) -> Result<i64> {
        let row = self.client.simple_query(sql).await?.into_row().await?;
        let value = row
            .and_then(|row| row.into_iter().next())
            .map(decode_column)
            .transpose()?;
        match value {
            Some(SqlValue::Int(v)) => Ok(v),
            Some(SqlValue::Decimal(d)) => Ok(d.trunc().to_i64().unwrap_or(0)),
            other => Err(MoverError::database(
                Dialect::MsSql,
                format!("expected an integer from '{}', got {:?}", sql, other),
            )),
        }
    }
}

/// Rewrite the accepted URL forms to the `jdbc:sqlserver://` shape tiberius parses.
fn jdbc_url(url: &str) -> String {
    let native = strip_jdbc(url);
    let rest = native
        .strip_prefix("sqlserver://")
        .or_else(|| native.strip_prefix("mssql://"))
        .unwrap_or(native);
    format!("jdbc:sqlserver://{}", rest)
}

#[async_trait]
impl DbConnection for MssqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MsSql
    }

    fn lob_support(&self) -> LobSupport {
        LobSupport { blob: true, clob: true }
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        if enabled {
            self.execute("IF @@TRANCOUNT > 0 COMMIT TRANSACTION").await?;
            self.execute("SET IMPLICIT_TRANSACTIONS OFF").await
        } else {
            self.execute("SET IMPLICIT_TRANSACTIONS ON").await
        }
    }

    async fn max_connections(&mut self) -> Result<u32> {
        let max = self.scalar("SELECT @@MAX_CONNECTIONS").await?;
        Ok(u32::try_from(max).unwrap_or(0))
    }

    async fn query_count(&mut self, sql: &str) -> Result<u64> {
        Ok(self.scalar(sql).await?.max(0) as u64)
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        let mut query = Query::new(DESCRIBE_SQL);
        query.bind(schema.to_string());
        query.bind(table.to_string());
        let rows = query.query(&mut self.client).await?.into_first_result().await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: &str = row.try_get(0)?.unwrap_or_default();
            let type_name: &str = row.try_get(1)?.unwrap_or_default();
            let length: i64 = row.try_get(2)?.unwrap_or(0);
            let scale: i64 = row.try_get(3)?.unwrap_or(0);
            let precision = max_length(type_name, length);
            columns.push(ColumnMeta::new(Dialect::MsSql, name, type_name, precision).with_scale(scale));
        }
        Ok(columns)
    }

    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        _columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let mut stream = self.client.simple_query(sql).await?;
        let columns = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        Ok(Box::new(MssqlCursor {
            rows: stream.into_row_stream(),
            columns,
            fetch_size: fetch_size.max(1),
        }))
    }

    async fn execute_batch(&mut self, sql: &str, columns: &[ColumnMeta], rows: &[Row]) -> Result<u64> {
        let mut affected = 0;
        for row in rows {
            let params = row
                .iter()
                .enumerate()
                .map(|(i, value)| to_param(value, columns.get(i)))
                .collect::<Result<Vec<Box<dyn ToSql>>>>()?;
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            affected += self.client.execute(sql, &refs).await?.total();
        }
        Ok(affected)
    }

    async fn commit(&mut self) -> Result<()> {
        self.execute("IF @@TRANCOUNT > 0 COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    async fn ping(&mut self) -> Result<()> {
        self.client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }
}

/// `(max)` types report a length of -1.
fn max_length(type_name: &str, length: i64) -> i64 {
    if length != -1 {
        return length;
    }
    match type_name.to_ascii_lowercase().as_str() {
        "nvarchar" => MSSQL_MAX_NVARCHAR_PRECISION,
        _ => MSSQL_MAX_VARCHAR_PRECISION,
    }
}

struct MssqlCursor<'a> {
    rows: BoxStream<'a, tiberius::Result<tiberius::Row>>,
    columns: Vec<String>,
    fetch_size: usize,
}

#[async_trait]
impl RowCursor for MssqlCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>> {
        let mut chunk = Vec::with_capacity(self.fetch_size);
        while chunk.len() < self.fetch_size {
            match self.rows.try_next().await? {
                Some(row) => chunk.push(row.into_iter().map(decode_column).collect::<Result<Row>>()?),
                None => break,
            }
        }
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

fn decode_column(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I16(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I32(v) => v.map(|v| SqlValue::Int(v.into())),
        ColumnData::I64(v) => v.map(SqlValue::Int),
        ColumnData::F32(v) => v.map(|v| SqlValue::Float(v.into())),
        ColumnData::F64(v) => v.map(SqlValue::Float),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(Bytes::copy_from_slice(b))),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(&data)?.map(SqlValue::Decimal),
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map(SqlValue::TimestampTz)
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map(SqlValue::Timestamp)
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Bind one value; NULLs are typed from the destination column so binary
/// columns do not receive an nvarchar NULL.
fn to_param(value: &SqlValue, column: Option<&ColumnMeta>) -> Result<Box<dyn ToSql>> {
    let binary = matches!(
        column.map(|c| &c.kind),
        Some(ColumnKind::Blob | ColumnKind::Binary | ColumnKind::LongVarBinary)
    );
    let param: Box<dyn ToSql> = match value {
        SqlValue::Null if binary => Box::new(Option::<Vec<u8>>::None),
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::Int(i) => Box::new(*i),
        SqlValue::Float(f) if f.is_finite() => Box::new(*f),
        // SQL Server float has no NaN or infinity
        SqlValue::Float(f) => {
            return Err(MoverError::database(
                Dialect::MsSql,
                format!(
                    "cannot bind {} to column {}",
                    f,
                    column.map_or("?", |c| c.name.as_str())
                ),
            ))
        }
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) if binary => Box::new(s.clone().into_bytes()),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Bytes(b) if binary => Box::new(b.to_vec()),
        SqlValue::Bytes(b) => Box::new(String::from_utf8_lossy(b).into_owned()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Date(d) => Box::new(*d),
        SqlValue::Timestamp(ts) => Box::new(*ts),
        SqlValue::TimestampTz(ts) => Box::new(*ts),
        SqlValue::Time(t) => Box::new(*t),
    };
    Ok(param)
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn test_jdbc_url_forms() {
        assert_eq!(
            jdbc_url("sqlserver://db:1433;databaseName=sales"),
            "jdbc:sqlserver://db:1433;databaseName=sales"
        );
        assert_eq!(jdbc_url("mssql://db;database=x"), "jdbc:sqlserver://db;database=x");
        assert_eq!(
            jdbc_url("jdbc:sqlserver://db:1433;encrypt=true"),
            "jdbc:sqlserver://db:1433;encrypt=true"
        );
    }

    #[test]
    fn test_max_length_maps_to_lob_precision() {
        assert_eq!(max_length("varchar", -1), MSSQL_MAX_VARCHAR_PRECISION);
        assert_eq!(max_length("varbinary", -1), MSSQL_MAX_VARCHAR_PRECISION);
        assert_eq!(max_length("NVARCHAR", -1), MSSQL_MAX_NVARCHAR_PRECISION);
        assert_eq!(max_length("varchar", 50), 50);
    }

    #[test]
    fn test_decode_column() {
        assert_eq!(decode_column(ColumnData::I32(Some(7))).unwrap(), SqlValue::Int(7));
        assert_eq!(decode_column(ColumnData::I32(None)).unwrap(), SqlValue::Null);
        assert_eq!(
            decode_column(ColumnData::String(Some(Cow::Borrowed("abc")))).unwrap(),
            SqlValue::Text("abc".into())
        );
        assert_eq!(
            decode_column(ColumnData::Binary(Some(Cow::Owned(vec![1, 2])))).unwrap(),
            SqlValue::Bytes(Bytes::from_static(&[1, 2]))
        );
    }

    fn column(name: &str, type_name: &str) -> ColumnMeta {
        ColumnMeta::new(Dialect::MsSql, name, type_name, 0)
    }

    #[test]
    fn test_null_binding_follows_column_kind() {
        let binary = to_param(&SqlValue::Null, Some(&column("B", "varbinary"))).unwrap();
        assert!(matches!(binary.to_sql(), ColumnData::Binary(None)));

        let text = to_param(&SqlValue::Null, Some(&column("C", "varchar"))).unwrap();
        assert!(matches!(text.to_sql(), ColumnData::String(None)));

        let bytes = to_param(&SqlValue::Text("ab".into()), Some(&column("L", "image"))).unwrap();
        assert!(matches!(bytes.to_sql(), ColumnData::Binary(Some(_))));
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        let score = column("SCORE", "float");
        for f in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = to_param(&SqlValue::Float(f), Some(&score)).err().unwrap();
            assert!(err.to_string().contains("SCORE"), "{}", err);
        }
        let ok = to_param(&SqlValue::Float(1.5), Some(&score)).unwrap();
        assert!(matches!(ok.to_sql(), ColumnData::F64(Some(_))));
    }
}
