//! Value conversion between [`SqlValue`] and the PostgreSQL wire types.

use std::error::Error;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::core::SqlValue;
use crate::error::Result;

type BoxError = Box<dyn Error + Sync + Send>;

/// Decode column `idx` of a result row by its wire type.
pub fn decode_value(row: &tokio_postgres::Row, idx: usize) -> Result<SqlValue> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(SqlValue::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(SqlValue::Int),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| SqlValue::Int(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| SqlValue::Float(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(SqlValue::Float),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(SqlValue::Decimal),
        Type::UUID => row.try_get::<_, Option<Uuid>>(idx)?.map(SqlValue::Uuid),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx)?.map(SqlValue::Date),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(SqlValue::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<FixedOffset>>>(idx)?
            .map(SqlValue::TimestampTz),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx)?.map(SqlValue::Time),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| SqlValue::Bytes(Bytes::from(b))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|v| SqlValue::Text(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(SqlValue::Text),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

/// Binds a [`SqlValue`] to whatever type the server inferred for the
/// placeholder, converting where the variant differs.
#[derive(Debug)]
pub struct PgParam<'a>(pub &'a SqlValue);

impl ToSql for PgParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        let value = self.0;
        if value.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => as_bool(value)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::INT4 => i32::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::INT8 => as_i64(value)?.to_sql(ty, out),
            Type::OID => u32::try_from(as_i64(value)?)?.to_sql(ty, out),
            Type::FLOAT4 => (as_f64(value)? as f32).to_sql(ty, out),
            Type::FLOAT8 => as_f64(value)?.to_sql(ty, out),
            Type::NUMERIC => as_decimal(value)?.to_sql(ty, out),
            Type::UUID => as_uuid(value)?.to_sql(ty, out),
            Type::DATE => as_date(value)?.to_sql(ty, out),
            Type::TIMESTAMP => as_timestamp(value)?.to_sql(ty, out),
            Type::TIMESTAMPTZ => as_timestamptz(value)?.to_sql(ty, out),
            Type::TIME => as_time(value)?.to_sql(ty, out),
            Type::BYTEA => match value {
                SqlValue::Bytes(b) => b.as_ref().to_sql(ty, out),
                other => as_text(other)?.as_bytes().to_sql(ty, out),
            },
            Type::JSON | Type::JSONB => {
                serde_json::Value::from_str(&as_text(value)?)?.to_sql(ty, out)
            }
            _ => as_text(value)?.as_str().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn mismatch(value: &SqlValue, target: &str) -> BoxError {
    format!("cannot bind {} value as {}", value.type_label(), target).into()
}

fn as_text(value: &SqlValue) -> std::result::Result<String, BoxError> {
    match value {
        SqlValue::Text(s) => Ok(s.clone()),
        SqlValue::Bytes(b) => Ok(String::from_utf8(b.to_vec())?),
        other => other.to_text().ok_or_else(|| mismatch(other, "text")),
    }
}

fn as_bool(value: &SqlValue) -> std::result::Result<bool, BoxError> {
    match value {
        SqlValue::Bool(b) => Ok(*b),
        SqlValue::Int(i) => Ok(*i != 0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "y" | "yes" => Ok(true),
            "0" | "f" | "false" | "n" | "no" => Ok(false),
            _ => Err(mismatch(value, "boolean")),
        },
        other => Err(mismatch(other, "boolean")),
    }
}

fn as_i64(value: &SqlValue) -> std::result::Result<i64, BoxError> {
    match value {
        SqlValue::Int(i) => Ok(*i),
        SqlValue::Bool(b) => Ok(i64::from(*b)),
        SqlValue::Decimal(d) if d.fract().is_zero() => d.to_i64().ok_or_else(|| mismatch(value, "integer")),
        SqlValue::Float(f) if f.fract() == 0.0 => Ok(*f as i64),
        SqlValue::Text(s) => Ok(s.trim().parse()?),
        other => Err(mismatch(other, "integer")),
    }
}

fn as_f64(value: &SqlValue) -> std::result::Result<f64, BoxError> {
    match value {
        SqlValue::Float(f) => Ok(*f),
        SqlValue::Int(i) => Ok(*i as f64),
        SqlValue::Decimal(d) => d.to_f64().ok_or_else(|| mismatch(value, "float")),
        SqlValue::Text(s) => Ok(s.trim().parse()?),
        other => Err(mismatch(other, "float")),
    }
}

fn as_decimal(value: &SqlValue) -> std::result::Result<Decimal, BoxError> {
    match value {
        SqlValue::Decimal(d) => Ok(*d),
        SqlValue::Int(i) => Ok(Decimal::from(*i)),
        SqlValue::Float(f) => Decimal::from_f64(*f).ok_or_else(|| mismatch(value, "numeric")),
        SqlValue::Text(s) => {
            let s = s.trim();
            Ok(Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))?)
        }
        other => Err(mismatch(other, "numeric")),
    }
}

fn as_uuid(value: &SqlValue) -> std::result::Result<Uuid, BoxError> {
    match value {
        SqlValue::Uuid(u) => Ok(*u),
        SqlValue::Text(s) => Ok(Uuid::parse_str(s.trim())?),
        other => Err(mismatch(other, "uuid")),
    }
}

fn as_date(value: &SqlValue) -> std::result::Result<NaiveDate, BoxError> {
    match value {
        SqlValue::Date(d) => Ok(*d),
        SqlValue::Timestamp(ts) => Ok(ts.date()),
        SqlValue::TimestampTz(ts) => Ok(ts.naive_utc().date()),
        SqlValue::Text(s) => Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?),
        other => Err(mismatch(other, "date")),
    }
}

fn as_timestamp(value: &SqlValue) -> std::result::Result<NaiveDateTime, BoxError> {
    match value {
        SqlValue::Timestamp(ts) => Ok(*ts),
        SqlValue::TimestampTz(ts) => Ok(ts.naive_utc()),
        SqlValue::Date(d) => Ok(d.and_time(NaiveTime::MIN)),
        SqlValue::Text(s) => parse_timestamp_text(s).ok_or_else(|| mismatch(value, "timestamp")),
        other => Err(mismatch(other, "timestamp")),
    }
}

fn as_timestamptz(value: &SqlValue) -> std::result::Result<DateTime<FixedOffset>, BoxError> {
    match value {
        SqlValue::TimestampTz(ts) => Ok(*ts),
        other => Ok(as_timestamp(other)?.and_utc().fixed_offset()),
    }
}

fn as_time(value: &SqlValue) -> std::result::Result<NaiveTime, BoxError> {
    match value {
        SqlValue::Time(t) => Ok(*t),
        SqlValue::Timestamp(ts) => Ok(ts.time()),
        SqlValue::Text(s) => Ok(NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f")?),
        other => Err(mismatch(other, "time")),
    }
}

fn parse_timestamp_text(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|ts| ts.with_timezone(&Utc).naive_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: SqlValue, ty: Type) -> std::result::Result<(IsNull, BytesMut), BoxError> {
        let mut out = BytesMut::new();
        let is_null = PgParam(&value).to_sql(&ty, &mut out)?;
        Ok((is_null, out))
    }

    #[test]
    fn test_null_binds_as_null_for_any_type() {
        let (is_null, out) = encode(SqlValue::Null, Type::INT4).unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        assert!(out.is_empty());
    }

    #[test]
    fn test_int_narrows_to_column_width() {
        let (_, out) = encode(SqlValue::Int(7), Type::INT4).unwrap();
        assert_eq!(out.as_ref(), &7i32.to_be_bytes());

        let (_, out) = encode(SqlValue::Int(7), Type::INT2).unwrap();
        assert_eq!(out.as_ref(), &7i16.to_be_bytes());

        assert!(encode(SqlValue::Int(i64::MAX), Type::INT4).is_err());
    }

    #[test]
    fn test_text_parses_into_typed_columns() {
        let (_, out) = encode(SqlValue::Text("42".into()), Type::INT8).unwrap();
        assert_eq!(out.as_ref(), &42i64.to_be_bytes());

        let (_, out) = encode(SqlValue::Text("true".into()), Type::BOOL).unwrap();
        assert_eq!(out.as_ref(), &[1u8]);

        assert!(encode(SqlValue::Text("abc".into()), Type::INT4).is_err());
    }

    #[test]
    fn test_bytes_bind_to_bytea_and_text() {
        let (_, out) = encode(SqlValue::from(vec![1u8, 2, 3]), Type::BYTEA).unwrap();
        assert_eq!(out.as_ref(), &[1u8, 2, 3]);

        let (_, out) = encode(SqlValue::from(b"hi".to_vec()), Type::TEXT).unwrap();
        assert_eq!(out.as_ref(), b"hi");
    }

    #[test]
    fn test_parse_timestamp_text() {
        assert!(parse_timestamp_text("2024-03-01T10:00:00").is_some());
        assert!(parse_timestamp_text("2024-03-01 10:00:00.5").is_some());
        assert!(parse_timestamp_text("2024-03-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp_text("yesterday").is_none());
    }
}
