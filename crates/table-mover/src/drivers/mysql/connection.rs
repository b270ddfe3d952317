//! MySQL connection over `mysql_async`.

use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::prelude::*;
use mysql_async::{BinaryProtocol, Conn, Opts, OptsBuilder, QueryResult, Value};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::core::{ColumnKind, ColumnMeta, DbConnection, Row, RowCursor, SqlValue};
use crate::dialect::Dialect;
use crate::drivers::common::strip_jdbc;
use crate::error::{MoverError, Result};

const DESCRIBE_SQL: &str = "SELECT COLUMN_NAME, DATA_TYPE, \
        CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, 0) AS SIGNED), \
        CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) \
    FROM information_schema.COLUMNS \
    WHERE TABLE_SCHEMA = COALESCE(NULLIF(?, ''), DATABASE()) AND TABLE_NAME = ? \
    ORDER BY ORDINAL_POSITION";

/// One MySQL session.
pub struct MySqlConnection {
    conn: Conn,
}

impl MySqlConnection {
    /// Connect with a `mysql://` or `jdbc:mysql://` URL.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let opts = Opts::from_url(strip_jdbc(&config.url))
            .map_err(|e| MoverError::Config(format!("invalid MySQL URL: {}", e)))?;
        let mut builder = OptsBuilder::from_opts(opts);
        if !config.user.is_empty() {
            builder = builder.user(Some(config.user.clone()));
        }
        if !config.password.is_empty() {
            builder = builder.pass(Some(config.password.clone()));
        }

        let conn = Conn::new(builder).await?;
        debug!("Connected to MySQL");
        Ok(Self { conn })
    }
}

#[async_trait]
impl DbConnection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        let sql = if enabled { "SET autocommit=1" } else { "SET autocommit=0" };
        self.conn.query_drop(sql).await?;
        Ok(())
    }

    async fn max_connections(&mut self) -> Result<u32> {
        let max: Option<u64> = self.conn.query_first("SELECT @@max_connections").await?;
        Ok(max.and_then(|m| u32::try_from(m).ok()).unwrap_or(0))
    }

    async fn query_count(&mut self, sql: &str) -> Result<u64> {
        let count: Option<i64> = self.conn.query_first(sql).await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        let rows: Vec<(String, String, i64, i64)> = self
            .conn
            .exec(DESCRIBE_SQL, (schema.to_string(), table.to_string()))
            .await?;
        Ok(rows
            .into_iter()
            .map(|(name, type_name, precision, scale)| {
                ColumnMeta::new(Dialect::MySql, name, &type_name, precision).with_scale(scale)
            })
            .collect())
    }

    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let result = self.conn.exec_iter(sql.to_string(), ()).await?;
        let names = result
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect();

        Ok(Box::new(MySqlCursor {
            result,
            names,
            kinds: columns.iter().map(|c| c.kind.clone()).collect(),
            fetch_size: fetch_size.max(1),
        }))
    }

    async fn execute_batch(&mut self, sql: &str, _columns: &[ColumnMeta], rows: &[Row]) -> Result<u64> {
        let params: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| row.iter().map(to_mysql).collect())
            .collect();
        self.conn.exec_batch(sql, params).await?;
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.conn.ping().await?;
        Ok(())
    }
}

struct MySqlCursor<'a> {
    result: QueryResult<'a, 'static, BinaryProtocol>,
    names: Vec<String>,
    kinds: Vec<ColumnKind>,
    fetch_size: usize,
}

#[async_trait]
impl RowCursor for MySqlCursor<'_> {
    fn columns(&self) -> &[String] {
        &self.names
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>> {
        let mut chunk = Vec::with_capacity(self.fetch_size);
        while chunk.len() < self.fetch_size {
            let Some(mut row) = self.result.next().await? else {
                break;
            };
            let values = (0..row.len())
                .map(|i| {
                    let value = row.take::<Value, _>(i).unwrap_or(Value::NULL);
                    decode_value(value, self.kinds.get(i))
                })
                .collect();
            chunk.push(values);
        }
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

/// Binary-protocol value to [`SqlValue`]; `kind` is `None` for columns
/// outside the table (the pagination column).
fn decode_value(value: Value, kind: Option<&ColumnKind>) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) if kind == Some(&ColumnKind::Boolean) => SqlValue::Bool(i != 0),
        Value::Int(i) => SqlValue::Int(i),
        Value::UInt(u) => match i64::try_from(u) {
            Ok(i) => SqlValue::Int(i),
            Err(_) => SqlValue::Decimal(Decimal::from(u)),
        },
        Value::Float(f) => SqlValue::Float(f.into()),
        Value::Double(f) => SqlValue::Float(f),
        Value::Date(y, mo, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(y.into(), mo.into(), d.into());
            match (date, kind) {
                (Some(date), Some(ColumnKind::Date)) => SqlValue::Date(date),
                (Some(date), _) => NaiveTime::from_hms_micro_opt(h.into(), mi.into(), s.into(), us)
                    .map(|t| SqlValue::Timestamp(date.and_time(t)))
                    .unwrap_or(SqlValue::Date(date)),
                // Zero dates ('0000-00-00') have no chrono form.
                (None, _) => SqlValue::Null,
            }
        }
        Value::Time(negative, days, h, mi, s, us) => {
            match NaiveTime::from_hms_micro_opt(h.into(), mi.into(), s.into(), us) {
                Some(t) if !negative && days == 0 => SqlValue::Time(t),
                _ => {
                    let hours = u64::from(days) * 24 + u64::from(h);
                    let sign = if negative { "-" } else { "" };
                    SqlValue::Text(format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mi, s, us))
                }
            }
        }
        Value::Bytes(bytes) => decode_bytes(bytes, kind),
    }
}

fn decode_bytes(bytes: Vec<u8>, kind: Option<&ColumnKind>) -> SqlValue {
    if matches!(
        kind,
        Some(ColumnKind::Blob | ColumnKind::Binary | ColumnKind::LongVarBinary)
    ) {
        return SqlValue::Bytes(Bytes::from(bytes));
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return SqlValue::Bytes(Bytes::from(e.into_bytes())),
    };
    match kind {
        Some(ColumnKind::Numeric) => Decimal::from_str(&text)
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Text(text)),
        Some(ColumnKind::Integer | ColumnKind::BigInt) => text
            .parse()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Text(text)),
        _ => SqlValue::Text(text),
    }
}

fn to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(b) => Value::Int(i64::from(*b)),
        SqlValue::Int(i) => Value::Int(*i),
        SqlValue::Float(f) => Value::Double(*f),
        SqlValue::Decimal(d) => Value::Bytes(d.to_string().into_bytes()),
        SqlValue::Text(s) => Value::Bytes(s.clone().into_bytes()),
        SqlValue::Bytes(b) => Value::Bytes(b.to_vec()),
        SqlValue::Uuid(u) => Value::Bytes(u.to_string().into_bytes()),
        SqlValue::Date(d) => date_value(&d.and_time(NaiveTime::MIN)),
        SqlValue::Timestamp(ts) => date_value(ts),
        SqlValue::TimestampTz(ts) => date_value(&ts.naive_utc()),
        SqlValue::Time(t) => Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}

fn date_value(ts: &NaiveDateTime) -> Value {
    Value::Date(
        u16::try_from(ts.year()).unwrap_or(0),
        ts.month() as u8,
        ts.day() as u8,
        ts.hour() as u8,
        ts.minute() as u8,
        ts.second() as u8,
        ts.nanosecond() / 1_000,
    )
}
