//! Column values as they travel between a cursor, the CSV codec and an INSERT.

use bytes::Bytes;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One typed field of a row.
///
/// Drivers decode into the closest variant for the column; the codec
/// decides how each variant is rendered or bound from the column's
/// [`ColumnKind`](super::ColumnKind), not from the variant alone.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    /// Every integer width (smallint through bigint).
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    /// Raw bytes; reference counted so LOB payloads are not copied per hop.
    Bytes(Bytes),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Time(NaiveTime),
}

/// A decoded row, one value per physical column.
pub type Row = Vec<SqlValue>;

impl SqlValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, used in codec error messages.
    pub fn type_label(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::Date(_) => "date",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::TimestampTz(_) => "timestamptz",
            SqlValue::Time(_) => "time",
        }
    }

    /// Plain text form for drivers that only bind strings (ODBC text
    /// buffers, MySQL fallbacks). Returns `None` for NULL and raw bytes.
    pub fn to_text(&self) -> Option<String> {
        match self {
            SqlValue::Null | SqlValue::Bytes(_) => None,
            SqlValue::Bool(v) => Some(if *v { "1" } else { "0" }.to_string()),
            SqlValue::Int(v) => Some(v.to_string()),
            SqlValue::Float(v) => Some(v.to_string()),
            SqlValue::Decimal(v) => Some(v.to_string()),
            SqlValue::Text(v) => Some(v.clone()),
            SqlValue::Uuid(v) => Some(v.to_string()),
            SqlValue::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
            SqlValue::Timestamp(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            SqlValue::TimestampTz(v) => Some(v.format("%Y-%m-%d %H:%M:%S%.f%:z").to_string()),
            SqlValue::Time(v) => Some(v.format("%H:%M:%S%.f").to_string()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(Bytes::from(v))
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(SqlValue::Null, Into::into)
    }
}
