//! DB to CSV: encodes cursor rows and appends them to the table's file.

use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::debug;

use super::codec::{encode_text, escape_field, DATE_FORMAT, TIMESTAMP_FORMAT};
use super::sidecar::Sidecar;
use crate::core::{ColumnKind, ColumnMeta, Row, SqlValue};
use crate::error::{MoverError, Result};

struct CsvFile {
    writer: BufWriter<File>,
    unflushed: u64,
    rows: u64,
}

/// Export pipeline for one table, shared by all of its page workers.
///
/// Rows are encoded outside the file lock; only the append and the
/// periodic flush hold it.
pub struct ExportPipeline {
    table: String,
    csv_path: PathBuf,
    sidecar: Sidecar,
    file: Mutex<CsvFile>,
    flush_interval: usize,
}

impl ExportPipeline {
    /// Create (or truncate) `csv_path`.
    pub async fn create(table: &str, csv_path: PathBuf, flush_interval: u64) -> Result<Self> {
        let file = File::create(&csv_path).await?;
        debug!("{}: writing {}", table, csv_path.display());

        Ok(Self {
            table: table.to_string(),
            sidecar: Sidecar::for_csv(&csv_path),
            csv_path,
            file: Mutex::new(CsvFile {
                writer: BufWriter::new(file),
                unflushed: 0,
                rows: 0,
            }),
            flush_interval: flush_interval.max(1) as usize,
        })
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    /// Encode and append `rows` in order, flushing every flush interval.
    ///
    /// `skip` is the index of a pagination column to drop from each row.
    pub async fn write_rows(
        &self,
        columns: &[ColumnMeta],
        rows: &[Row],
        skip: Option<usize>,
    ) -> Result<u64> {
        for slice in rows.chunks(self.flush_interval) {
            let mut buf = String::new();
            for row in slice {
                self.encode_row(columns, row, skip, &mut buf).await?;
            }

            let mut file = self.file.lock().await;
            file.writer.write_all(buf.as_bytes()).await?;
            file.rows += slice.len() as u64;
            file.unflushed += slice.len() as u64;
            if file.unflushed >= self.flush_interval as u64 {
                file.writer.flush().await?;
                file.unflushed = 0;
            }
        }
        Ok(rows.len() as u64)
    }

    /// Flush whatever is buffered; returns the rows written so far.
    pub async fn finish(&self) -> Result<u64> {
        let mut file = self.file.lock().await;
        file.writer.flush().await?;
        file.unflushed = 0;
        Ok(file.rows)
    }

    async fn encode_row(
        &self,
        columns: &[ColumnMeta],
        row: &Row,
        skip: Option<usize>,
        out: &mut String,
    ) -> Result<()> {
        let values: Vec<&SqlValue> = row
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, v)| v)
            .collect();

        if values.len() != columns.len() {
            return Err(MoverError::codec(
                &self.table,
                format!("{:?}", row),
                format!("expected {} values, got {}", columns.len(), values.len()),
            ));
        }

        let start = out.len();
        for (i, (column, value)) in columns.iter().zip(values).enumerate() {
            if i > 0 {
                out.push(',');
            }
            let field = self.encode_value(column, value).await?;
            out.push_str(&field);
        }

        // A lone empty field would leave a blank line, which import skips
        if out.len() == start {
            out.push_str("\"\"");
        }
        out.push('\n');
        Ok(())
    }

    async fn encode_value(&self, column: &ColumnMeta, value: &SqlValue) -> Result<String> {
        if value.is_null() {
            return Ok(String::new());
        }

        if column.kind.is_lob() {
            let id = match value {
                SqlValue::Bytes(bytes) => self.sidecar.write(bytes).await?,
                SqlValue::Text(text) => self.sidecar.write(text.as_bytes()).await?,
                other => {
                    let text = other.to_text().unwrap_or_default();
                    self.sidecar.write(text.as_bytes()).await?
                }
            };
            return Ok(id.to_string());
        }

        let field = match (&column.kind, value) {
            (ColumnKind::Char, SqlValue::Text(text)) => encode_char(text),
            (ColumnKind::Char, other) => encode_char(&other.to_text().unwrap_or_default()),
            (ColumnKind::Integer | ColumnKind::BigInt, SqlValue::Int(v)) => v.to_string(),
            (ColumnKind::Float, SqlValue::Float(v)) => v.to_string(),
            (ColumnKind::Numeric, SqlValue::Decimal(v)) => v.to_string(),
            (ColumnKind::Date, SqlValue::Date(d)) => d.format(DATE_FORMAT).to_string(),
            (ColumnKind::Date, SqlValue::Timestamp(ts)) => ts.date().format(DATE_FORMAT).to_string(),
            (ColumnKind::Timestamp, SqlValue::Timestamp(ts)) => {
                ts.format(TIMESTAMP_FORMAT).to_string()
            }
            (ColumnKind::Timestamp, SqlValue::TimestampTz(ts)) => {
                ts.naive_utc().format(TIMESTAMP_FORMAT).to_string()
            }
            (ColumnKind::Timestamp, SqlValue::Date(d)) => d
                .and_time(NaiveTime::MIN)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
            (ColumnKind::Boolean, SqlValue::Bool(v)) => v.to_string(),
            (ColumnKind::Unknown(_), _) => String::new(),
            // Driver decoded a different variant than the declared family
            (_, other) => escape_field(&other.to_text().unwrap_or_default(), false).into_owned(),
        };
        Ok(field)
    }
}

/// Textual column: collapse line breaks, trim, and quote any field that
/// contained a line break.
fn encode_char(text: &str) -> String {
    let (encoded, had_break) = encode_text(text);
    escape_field(&encoded, had_break).into_owned()
}
