//! CSV to DB: hands out decoded rows from one shared line reader.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

use super::codec::{decode_text, field_error, parse_bool, parse_date, parse_timestamp, split_record};
use super::sidecar::Sidecar;
use crate::core::{ColumnKind, ColumnMeta, Row, SqlValue};
use crate::error::{MoverError, Result};

/// Import pipeline for one table.
///
/// Line acquisition is serialised by the reader lock; decoding (and the
/// sidecar reads it implies) runs in the calling worker.
pub struct ImportPipeline {
    table: String,
    csv_path: PathBuf,
    columns: Vec<ColumnMeta>,
    sidecar: Sidecar,
    reader: Mutex<Lines<BufReader<File>>>,
    lines_read: AtomicU64,
}

impl ImportPipeline {
    /// Open `csv_path` for a table described by `columns`.
    pub async fn open(table: &str, csv_path: PathBuf, columns: Vec<ColumnMeta>) -> Result<Self> {
        let file = File::open(&csv_path).await?;
        Ok(Self {
            table: table.to_string(),
            sidecar: Sidecar::for_csv(&csv_path),
            csv_path,
            columns,
            reader: Mutex::new(BufReader::new(file).lines()),
            lines_read: AtomicU64::new(0),
        })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Non-empty lines handed out so far.
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    /// Next decoded row, `None` at end of file. Blank lines are skipped.
    pub async fn next_row(&self) -> Result<Option<Row>> {
        let line = {
            let mut reader = self.reader.lock().await;
            loop {
                match reader.next_line().await? {
                    None => return Ok(None),
                    Some(line) if line.trim().is_empty() => continue,
                    Some(line) => break line,
                }
            }
        };
        self.lines_read.fetch_add(1, Ordering::Relaxed);
        self.decode_line(&line).await.map(Some)
    }

    /// Decode one CSV record against the table's columns.
    pub async fn decode_line(&self, line: &str) -> Result<Row> {
        let fields =
            split_record(line).map_err(|e| MoverError::codec(&self.table, line, e))?;

        if fields.len() != self.columns.len() {
            return Err(MoverError::codec(
                &self.table,
                line,
                format!(
                    "expected {} fields, got {}",
                    self.columns.len(),
                    fields.len()
                ),
            ));
        }

        let mut row = Vec::with_capacity(fields.len());
        for (column, raw) in self.columns.iter().zip(&fields) {
            row.push(self.decode_field(column, raw, line).await?);
        }
        Ok(row)
    }

    async fn decode_field(&self, column: &ColumnMeta, raw: &str, line: &str) -> Result<SqlValue> {
        // Empty means NULL for every type, textual columns included
        if raw.is_empty() {
            return Ok(SqlValue::Null);
        }

        let text = decode_text(raw);
        let fail = |kind: &str| field_error(&self.table, line, &column.name, kind, raw);

        let value = match &column.kind {
            ColumnKind::Char | ColumnKind::Unknown(_) => SqlValue::Text(text.into_owned()),
            ColumnKind::Integer | ColumnKind::BigInt => {
                SqlValue::Int(text.trim().parse::<i64>().map_err(|_| fail("integer"))?)
            }
            ColumnKind::Float => {
                SqlValue::Float(text.trim().parse::<f64>().map_err(|_| fail("float"))?)
            }
            ColumnKind::Numeric => {
                let trimmed = text.trim();
                let decimal = Decimal::from_str(trimmed)
                    .or_else(|_| Decimal::from_scientific(trimmed))
                    .map_err(|_| fail("numeric"))?;
                SqlValue::Decimal(decimal)
            }
            ColumnKind::Date => match parse_date(&text) {
                Some(date) => SqlValue::Date(date),
                None => SqlValue::Timestamp(parse_timestamp(&text).ok_or_else(|| fail("date"))?),
            },
            ColumnKind::Timestamp => {
                SqlValue::Timestamp(parse_timestamp(&text).ok_or_else(|| fail("timestamp"))?)
            }
            ColumnKind::Boolean => SqlValue::Bool(parse_bool(&text).ok_or_else(|| fail("boolean"))?),
            ColumnKind::Clob | ColumnKind::NClob => {
                let payload = self.sidecar.read(raw).await?;
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| fail("UTF-8 character data"))?;
                SqlValue::Text(text)
            }
            ColumnKind::Blob | ColumnKind::Binary | ColumnKind::LongVarBinary | ColumnKind::Text => {
                SqlValue::Bytes(self.sidecar.read(raw).await?)
            }
        };
        Ok(value)
    }
}

/// Rows an import of `csv_path` will insert: its non-empty lines.
pub async fn count_rows(csv_path: &Path) -> Result<u64> {
    let file = File::open(csv_path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}
