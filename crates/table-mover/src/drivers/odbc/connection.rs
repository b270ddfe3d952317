//! ODBC connection over `odbc-api`.
//!
//! ODBC calls block, so every call runs inside
//! [`tokio::task::block_in_place`]; a multi-threaded runtime is required.
//! Result sets without LOB columns are read in blocks through a
//! [`TextRowSet`] and decoded from their text form using the table's column
//! kinds. Result sets with LOB columns are read row by row with
//! `SQLGetData` so every value arrives whole.

use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use bytes::Bytes;
use odbc_api::buffers::TextRowSet;
use odbc_api::parameter::{InputParameter, VarBinaryBox, VarCharBox};
use odbc_api::{Connection, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use rust_decimal::Decimal;
use tokio::task::block_in_place;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::core::{ColumnKind, ColumnMeta, DbConnection, LobSupport, Row, RowCursor, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MoverError, Result};
use crate::pipeline::{parse_bool, parse_date, parse_timestamp};

const FETCH_ROWS: usize = 1_000;
/// Widest cell of a block fetch; a longer value fails the fetch.
const MAX_TEXT_LEN: usize = 64 * 1024;

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env);
    }
    let env = Environment::new().map_err(|e| {
        MoverError::Unsupported(format!(
            "ODBC environment unavailable ({}); install an ODBC driver manager such as unixODBC",
            e
        ))
    })?;
    // Another caller may have set it first.
    let _ = ENVIRONMENT.set(env);
    ENVIRONMENT
        .get()
        .ok_or_else(|| MoverError::Unsupported("ODBC environment unavailable".into()))
}

/// Build the driver connection string from an `odbc:` URL.
fn connection_string(config: &ConnectionConfig) -> String {
    let mut conn_str = config
        .url
        .trim()
        .strip_prefix("odbc:")
        .unwrap_or(config.url.trim())
        .to_string();
    if !config.user.is_empty() {
        if !conn_str.is_empty() && !conn_str.ends_with(';') {
            conn_str.push(';');
        }
        conn_str.push_str(&format!("UID={};PWD={};", config.user, config.password));
    }
    conn_str
}

/// One ODBC session; the dialect comes from the DBMS name the driver reports.
pub struct OdbcConnection {
    conn: Connection<'static>,
    dialect: Dialect,
}

impl OdbcConnection {
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let env = environment()?;
        let conn_str = connection_string(config);
        block_in_place(|| {
            let conn = env.connect_with_connection_string(&conn_str, ConnectionOptions::default())?;
            let dbms = conn.database_management_system_name()?;
            let dialect = Dialect::from_dbms_name(&dbms);
            debug!("Connected via ODBC to {} ({})", dbms, dialect);
            Ok(Self { conn, dialect })
        })
    }

    fn fetch_all(&self, sql: &str, kinds: &[ColumnKind]) -> Result<(Vec<String>, Vec<Row>)> {
        let Some(mut cursor) = self.conn.execute(sql, ())? else {
            return Ok((Vec::new(), Vec::new()));
        };
        let names = cursor.column_names()?.collect::<std::result::Result<Vec<_>, _>>()?;
        let rows = if reads_long_data(kinds) {
            fetch_rows(cursor, names.len(), kinds)?
        } else {
            fetch_blocks(cursor, names.len(), kinds)?
        };
        Ok((names, rows))
    }
}

/// LOB columns cannot be bound to a fixed-width block buffer.
fn reads_long_data(kinds: &[ColumnKind]) -> bool {
    kinds.iter().any(ColumnKind::is_lob)
}

fn fetch_blocks<C: Cursor>(mut cursor: C, width: usize, kinds: &[ColumnKind]) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut buffers = TextRowSet::for_cursor(FETCH_ROWS, &mut cursor, Some(MAX_TEXT_LEN))?;
    let mut block = cursor.bind_buffer(&mut buffers)?;
    while let Some(batch) = block.fetch_with_truncation_check(true)? {
        for row_idx in 0..batch.num_rows() {
            let row = (0..width)
                .map(|col| decode_text(batch.at(col, row_idx), kinds.get(col)))
                .collect();
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Fetch one row at a time, reading each cell in full.
fn fetch_rows<C: Cursor>(mut cursor: C, width: usize, kinds: &[ColumnKind]) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    while let Some(mut cursor_row) = cursor.next_row()? {
        let mut row = Vec::with_capacity(width);
        for col in 0..width {
            let index = (col + 1) as u16;
            let kind = kinds.get(col);
            let mut buf = Vec::new();
            let present = if is_binary(kind) {
                cursor_row.get_binary(index, &mut buf)?
            } else {
                cursor_row.get_text(index, &mut buf)?
            };
            row.push(decode_cell(present.then_some(buf), kind));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn is_binary(kind: Option<&ColumnKind>) -> bool {
    matches!(
        kind,
        Some(ColumnKind::Blob | ColumnKind::Binary | ColumnKind::LongVarBinary)
    )
}

/// Decode a cell read with `SQLGetData`: raw bytes for binary columns,
/// text for the rest.
fn decode_cell(cell: Option<Vec<u8>>, kind: Option<&ColumnKind>) -> SqlValue {
    match cell {
        None => SqlValue::Null,
        Some(bytes) if is_binary(kind) => SqlValue::Bytes(Bytes::from(bytes)),
        Some(bytes) => decode_text(Some(bytes.as_slice()), kind),
    }
}

#[async_trait]
impl DbConnection for OdbcConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn lob_support(&self) -> LobSupport {
        match self.dialect {
            Dialect::Oracle | Dialect::H2 => LobSupport { blob: true, clob: true },
            _ => LobSupport::default(),
        }
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        block_in_place(|| Ok(self.conn.set_autocommit(enabled)?))
    }

    async fn max_connections(&mut self) -> Result<u32> {
        Ok(0)
    }

    async fn query_count(&mut self, sql: &str) -> Result<u64> {
        let (_, rows) = block_in_place(|| self.fetch_all(sql, &[ColumnKind::BigInt]))?;
        match rows.first().and_then(|row| row.first()) {
            Some(SqlValue::Int(n)) => Ok((*n).max(0) as u64),
            other => Err(MoverError::database(
                self.dialect,
                format!("expected a count from '{}', got {:?}", sql, other),
            )),
        }
    }

    async fn describe_table(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        let dialect = self.dialect;
        let schema = if schema.is_empty() { "%" } else { schema };
        block_in_place(|| {
            let mut columns = Vec::new();
            let mut cursor = self.conn.columns("", schema, table, "%")?;
            let mut buffers = TextRowSet::for_cursor(FETCH_ROWS, &mut cursor, Some(4096))?;
            let mut block = cursor.bind_buffer(&mut buffers)?;
            while let Some(batch) = block.fetch_with_truncation_check(true)? {
                for row in 0..batch.num_rows() {
                    let text = |col: usize| {
                        batch
                            .at(col, row)
                            .map(|b| String::from_utf8_lossy(b).into_owned())
                            .unwrap_or_default()
                    };
                    // SQLColumns: 4 COLUMN_NAME, 6 TYPE_NAME, 7 COLUMN_SIZE, 9 DECIMAL_DIGITS
                    let precision = text(6).trim().parse().unwrap_or(0);
                    let scale = text(8).trim().parse().unwrap_or(0);
                    columns.push(
                        ColumnMeta::new(dialect, text(3), &text(5), precision).with_scale(scale),
                    );
                }
            }
            Ok(columns)
        })
    }

    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let kinds: Vec<ColumnKind> = columns.iter().map(|c| c.kind.clone()).collect();
        let (names, rows) = block_in_place(|| self.fetch_all(sql, &kinds))?;
        Ok(Box::new(BufferedCursor {
            names,
            rows: rows.into_iter(),
            fetch_size: fetch_size.max(1),
        }))
    }

    async fn execute_batch(&mut self, sql: &str, columns: &[ColumnMeta], rows: &[Row]) -> Result<u64> {
        block_in_place(|| {
            let mut prepared = self.conn.prepare(sql)?;
            for row in rows {
                let params: Vec<Box<dyn InputParameter>> = row
                    .iter()
                    .enumerate()
                    .map(|(i, value)| to_parameter(value, columns.get(i).map(|c| &c.kind)))
                    .collect();
                prepared.execute(params.as_slice())?;
            }
            Ok(rows.len() as u64)
        })
    }

    async fn commit(&mut self) -> Result<()> {
        block_in_place(|| Ok(self.conn.commit()?))
    }

    async fn rollback(&mut self) -> Result<()> {
        block_in_place(|| Ok(self.conn.rollback()?))
    }

    async fn ping(&mut self) -> Result<()> {
        match block_in_place(|| self.conn.is_dead())? {
            false => Ok(()),
            true => Err(MoverError::database(self.dialect, "ODBC connection is dead")),
        }
    }
}

/// Rows fetched eagerly, handed out in chunks.
struct BufferedCursor {
    names: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    fetch_size: usize,
}

#[async_trait]
impl RowCursor for BufferedCursor {
    fn columns(&self) -> &[String] {
        &self.names
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>> {
        let chunk: Vec<Row> = self.rows.by_ref().take(self.fetch_size).collect();
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

/// Decode one text cell.
fn decode_text(cell: Option<&[u8]>, kind: Option<&ColumnKind>) -> SqlValue {
    let Some(cell) = cell else {
        return SqlValue::Null;
    };
    let text = String::from_utf8_lossy(cell);
    let value = match kind {
        Some(ColumnKind::Integer | ColumnKind::BigInt) => text.trim().parse().ok().map(SqlValue::Int),
        Some(ColumnKind::Float) => text.trim().parse().ok().map(SqlValue::Float),
        Some(ColumnKind::Numeric) => Decimal::from_str(text.trim())
            .or_else(|_| Decimal::from_scientific(text.trim()))
            .ok()
            .map(SqlValue::Decimal),
        Some(ColumnKind::Boolean) => parse_bool(&text).map(SqlValue::Bool),
        Some(ColumnKind::Date) => parse_date(&text).map(SqlValue::Date),
        Some(ColumnKind::Timestamp) => parse_timestamp(&text).map(SqlValue::Timestamp),
        _ => None,
    };
    value.unwrap_or_else(|| SqlValue::Text(text.into_owned()))
}

fn to_parameter(value: &SqlValue, kind: Option<&ColumnKind>) -> Box<dyn InputParameter> {
    let binary = matches!(
        kind,
        Some(ColumnKind::Blob | ColumnKind::Binary | ColumnKind::LongVarBinary)
    );
    match value {
        SqlValue::Null if binary => Box::new(VarBinaryBox::null()),
        SqlValue::Null => Box::new(VarCharBox::null()),
        SqlValue::Bytes(b) => Box::new(VarBinaryBox::from_vec(b.to_vec())),
        SqlValue::Text(s) if binary => Box::new(VarBinaryBox::from_vec(s.clone().into_bytes())),
        other => Box::new(VarCharBox::from_string(other.to_text().unwrap_or_default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_appends_credentials() {
        let config = ConnectionConfig {
            url: "odbc:DSN=ora".into(),
            schema: String::new(),
            user: "scott".into(),
            password: "tiger".into(),
        };
        assert_eq!(connection_string(&config), "DSN=ora;UID=scott;PWD=tiger;");
    }

    #[test]
    fn test_decode_text_by_kind() {
        assert_eq!(decode_text(None, Some(&ColumnKind::Char)), SqlValue::Null);
        assert_eq!(decode_text(Some(b"42"), Some(&ColumnKind::Integer)), SqlValue::Int(42));
        assert_eq!(
            decode_text(Some(b"abc"), Some(&ColumnKind::Integer)),
            SqlValue::Text("abc".into())
        );
    }

    #[test]
    fn test_lob_tables_read_row_by_row() {
        let oracle = |t: &str| ColumnKind::resolve(Dialect::Oracle, t, 0);
        assert!(reads_long_data(&[oracle("NUMBER"), oracle("BLOB")]));
        assert!(reads_long_data(&[oracle("CLOB")]));
        assert!(!reads_long_data(&[oracle("NUMBER"), oracle("VARCHAR2"), oracle("DATE")]));
    }

    #[test]
    fn test_long_cells_decode_whole() {
        let payload: Vec<u8> = (0..(2 << 20)).map(|i| (i % 251) as u8).collect();
        match decode_cell(Some(payload.clone()), Some(&ColumnKind::Blob)) {
            SqlValue::Bytes(bytes) => assert_eq!(bytes.as_ref(), payload.as_slice()),
            other => panic!("unexpected {}", other.type_label()),
        }

        let note = "x".repeat(3 << 20);
        assert_eq!(
            decode_cell(Some(note.clone().into_bytes()), Some(&ColumnKind::Clob)),
            SqlValue::Text(note)
        );
        assert_eq!(decode_cell(None, Some(&ColumnKind::Blob)), SqlValue::Null);
    }
}
