//! Column metadata and the type families that drive the row codec.

use serde::{Deserialize, Serialize};

use crate::dialect::Dialect;

/// Declared precision of `varchar(max)` / `varbinary(max)` on SQL Server.
pub const MSSQL_MAX_VARCHAR_PRECISION: i64 = 2_147_483_647;

/// Declared precision of `nvarchar(max)` on SQL Server.
pub const MSSQL_MAX_NVARCHAR_PRECISION: i64 = 1_073_741_823;

/// Type family of a column, decided once per table from catalog metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    /// CHAR, VARCHAR, NCHAR, NVARCHAR and friends.
    Char,
    Integer,
    BigInt,
    Float,
    Numeric,
    Date,
    Timestamp,
    Boolean,
    Blob,
    Binary,
    LongVarBinary,
    /// PostgreSQL `text`, treated as a binary LOB.
    Text,
    Clob,
    NClob,
    /// Anything else; carries the declared type name.
    Unknown(String),
}

impl ColumnKind {
    /// Classify a declared type.
    ///
    /// `type_name` is the catalog type name (parenthesised modifiers are
    /// ignored); `precision` is the declared character length or numeric
    /// precision, 0 when the catalog reports none.
    pub fn resolve(dialect: Dialect, type_name: &str, precision: i64) -> Self {
        let lower = type_name.trim().to_ascii_lowercase();
        let base = lower.split('(').next().unwrap_or("").trim();

        // Vendor rules first
        match (dialect, base) {
            (Dialect::MsSql, "varchar") if precision == MSSQL_MAX_VARCHAR_PRECISION => {
                return ColumnKind::Clob
            }
            (Dialect::MsSql, "nvarchar") if precision == MSSQL_MAX_NVARCHAR_PRECISION => {
                return ColumnKind::NClob
            }
            (Dialect::MsSql, "varbinary") if precision == MSSQL_MAX_VARCHAR_PRECISION => {
                return ColumnKind::LongVarBinary
            }
            (Dialect::MsSql, "text") => return ColumnKind::Clob,
            (Dialect::MsSql, "ntext") => return ColumnKind::NClob,
            (Dialect::MsSql, "timestamp" | "rowversion") => return ColumnKind::Binary,
            (Dialect::PostgreSql, "text") => return ColumnKind::Text,
            (Dialect::Oracle, "date") => return ColumnKind::Timestamp,
            _ => {}
        }

        match base {
            "char" | "nchar" | "varchar" | "nvarchar" | "varchar2" | "nvarchar2" | "character"
            | "character varying" | "bpchar" | "text" | "tinytext" | "mediumtext"
            | "longtext" | "enum" | "set" => ColumnKind::Char,
            "int" | "integer" | "int2" | "int4" | "smallint" | "tinyint" | "mediumint"
            | "serial" | "smallserial" => ColumnKind::Integer,
            "bigint" | "int8" | "bigserial" => ColumnKind::BigInt,
            "float" | "float4" | "float8" | "real" | "double" | "double precision"
            | "binary_float" | "binary_double" => ColumnKind::Float,
            "numeric" | "decimal" | "number" | "money" | "smallmoney" => ColumnKind::Numeric,
            "date" => ColumnKind::Date,
            "timestamp"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "timestamptz"
            | "datetime"
            | "datetime2"
            | "smalldatetime"
            | "datetimeoffset" => ColumnKind::Timestamp,
            "bool" | "boolean" | "bit" => ColumnKind::Boolean,
            "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary large object" => {
                ColumnKind::Blob
            }
            "binary" | "varbinary" | "bytea" | "raw" | "binary varying" => ColumnKind::Binary,
            "image" | "long raw" | "longvarbinary" => ColumnKind::LongVarBinary,
            "clob" | "character large object" | "long" => ColumnKind::Clob,
            "nclob" => ColumnKind::NClob,
            _ if base.starts_with("timestamp") => ColumnKind::Timestamp,
            _ => ColumnKind::Unknown(lower),
        }
    }

    /// Values of this kind travel through sidecar files.
    pub fn is_lob(&self) -> bool {
        matches!(
            self,
            ColumnKind::Blob
                | ColumnKind::Binary
                | ColumnKind::LongVarBinary
                | ColumnKind::Text
                | ColumnKind::Clob
                | ColumnKind::NClob
        )
    }

    /// Character LOBs are bound as text; every other LOB as bytes.
    pub fn is_character_lob(&self) -> bool {
        matches!(self, ColumnKind::Clob | ColumnKind::NClob)
    }
}

/// One physical column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,

    /// Declared type name as reported by the catalog.
    pub type_name: String,

    /// Character length or numeric precision (0 if not applicable).
    pub precision: i64,

    /// Numeric scale (0 if not applicable).
    pub scale: i64,

    pub kind: ColumnKind,
}

impl ColumnMeta {
    pub fn new(dialect: Dialect, name: impl Into<String>, type_name: &str, precision: i64) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.to_string(),
            precision,
            scale: 0,
            kind: ColumnKind::resolve(dialect, type_name, precision),
        }
    }

    pub fn with_scale(mut self, scale: i64) -> Self {
        self.scale = scale;
        self
    }
}
