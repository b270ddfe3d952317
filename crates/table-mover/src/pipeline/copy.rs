//! DB to DB: re-binds source rows for the destination's INSERT.

use bytes::Bytes;
use chrono::NaiveTime;

use crate::core::{ColumnKind, ColumnMeta, LobSupport, Row, SqlValue};
use crate::error::{MoverError, Result};

/// How a LOB column is handed to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobBinding {
    Blob,
    BinaryStream,
    Clob,
    CharacterStream,
}

impl LobBinding {
    /// Binding for a source column, or `None` if it is not a LOB.
    pub fn for_column(kind: &ColumnKind, destination: LobSupport) -> Option<Self> {
        if !kind.is_lob() {
            return None;
        }
        let binding = match (kind.is_character_lob(), destination) {
            (true, LobSupport { clob: true, .. }) => LobBinding::Clob,
            (true, _) => LobBinding::CharacterStream,
            (false, LobSupport { blob: true, .. }) => LobBinding::Blob,
            (false, _) => LobBinding::BinaryStream,
        };
        Some(binding)
    }

    fn is_binary(self) -> bool {
        matches!(self, LobBinding::Blob | LobBinding::BinaryStream)
    }
}

/// Per-table conversion from source rows to destination parameters.
pub struct CopyPipeline {
    table: String,
    columns: Vec<ColumnMeta>,
    bindings: Vec<Option<LobBinding>>,
}

impl CopyPipeline {
    /// `columns` describes the source table; `destination` is the LOB
    /// capability of the destination connection.
    pub fn new(table: &str, columns: Vec<ColumnMeta>, destination: LobSupport) -> Self {
        let bindings = columns
            .iter()
            .map(|c| LobBinding::for_column(&c.kind, destination))
            .collect();
        Self {
            table: table.to_string(),
            columns,
            bindings,
        }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Convert one source row, dropping the pagination column at `skip`.
    pub fn convert(&self, row: Row, skip: Option<usize>) -> Result<Row> {
        let values: Vec<SqlValue> = row
            .into_iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != skip)
            .map(|(_, v)| v)
            .collect();

        if values.len() != self.columns.len() {
            return Err(MoverError::codec(
                &self.table,
                format!("{:?}", values),
                format!("expected {} values, got {}", self.columns.len(), values.len()),
            ));
        }

        values
            .into_iter()
            .zip(self.columns.iter().zip(&self.bindings))
            .map(|(value, (column, binding))| self.bind(value, column, *binding))
            .collect()
    }

    fn bind(&self, value: SqlValue, column: &ColumnMeta, binding: Option<LobBinding>) -> Result<SqlValue> {
        if value.is_null() {
            return Ok(value);
        }

        if let Some(binding) = binding {
            return if binding.is_binary() {
                Ok(SqlValue::Bytes(into_bytes(value)))
            } else {
                into_text(value).map(SqlValue::Text).map_err(|message| {
                    MoverError::codec(&self.table, column.name.clone(), message)
                })
            };
        }

        let bound = match (&column.kind, value) {
            (ColumnKind::Char, SqlValue::Text(text)) => SqlValue::Text(text),
            (ColumnKind::Char, other) => SqlValue::Text(other.to_text().unwrap_or_default()),
            (ColumnKind::Timestamp, SqlValue::Date(d)) => SqlValue::Timestamp(d.and_time(NaiveTime::MIN)),
            (ColumnKind::Timestamp, SqlValue::TimestampTz(ts)) => SqlValue::Timestamp(ts.naive_utc()),
            (_, other) => other,
        };
        Ok(bound)
    }
}

fn into_bytes(value: SqlValue) -> Bytes {
    match value {
        SqlValue::Bytes(bytes) => bytes,
        SqlValue::Text(text) => Bytes::from(text.into_bytes()),
        other => Bytes::from(other.to_text().unwrap_or_default().into_bytes()),
    }
}

fn into_text(value: SqlValue) -> std::result::Result<String, String> {
    match value {
        SqlValue::Text(text) => Ok(text),
        SqlValue::Bytes(bytes) => String::from_utf8(bytes.to_vec())
            .map_err(|e| format!("character LOB is not valid UTF-8: {}", e)),
        other => Ok(other.to_text().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;

    fn oracle(name: &str, type_name: &str) -> ColumnMeta {
        ColumnMeta::new(Dialect::Oracle, name, type_name, 0)
    }

    #[test]
    fn test_postgres_destination_gets_streams() {
        let pg = LobSupport::default();
        assert_eq!(
            LobBinding::for_column(&ColumnKind::Blob, pg),
            Some(LobBinding::BinaryStream)
        );
        assert_eq!(
            LobBinding::for_column(&ColumnKind::Clob, pg),
            Some(LobBinding::CharacterStream)
        );
        assert_eq!(LobBinding::for_column(&ColumnKind::Char, pg), None);

        let native = LobSupport { blob: true, clob: true };
        assert_eq!(
            LobBinding::for_column(&ColumnKind::Blob, native),
            Some(LobBinding::Blob)
        );
        assert_eq!(
            LobBinding::for_column(&ColumnKind::NClob, native),
            Some(LobBinding::Clob)
        );
    }

    #[test]
    fn test_convert_strips_rnum_and_binds() {
        let pipeline = CopyPipeline::new(
            "S.T1",
            vec![oracle("ID", "NUMBER"), oracle("PAYLOAD", "BLOB"), oracle("NOTE", "CLOB")],
            LobSupport::default(),
        );

        let row = vec![
            SqlValue::Int(1),
            SqlValue::from(vec![0u8, 1, 2]),
            SqlValue::from(b"note".to_vec()),
            SqlValue::Int(1),
        ];
        let converted = pipeline.convert(row, Some(3)).unwrap();
        assert_eq!(
            converted,
            vec![
                SqlValue::Int(1),
                SqlValue::from(vec![0u8, 1, 2]),
                SqlValue::Text("note".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_clob_is_codec_error() {
        let pipeline = CopyPipeline::new("S.T1", vec![oracle("NOTE", "CLOB")], LobSupport::default());
        let err = pipeline
            .convert(vec![SqlValue::from(vec![0xffu8, 0xfe])], None)
            .unwrap_err();
        assert!(matches!(err, MoverError::Codec { .. }));
    }

    #[test]
    fn test_column_count_mismatch() {
        let pipeline = CopyPipeline::new("S.T1", vec![oracle("ID", "NUMBER")], LobSupport::default());
        assert!(pipeline.convert(vec![SqlValue::Int(1), SqlValue::Int(2)], None).is_err());
    }
}
