//! Core abstractions shared by drivers, pipelines and workers.
//!
//! - [`schema`]: column metadata and type families
//! - [`value`]: typed field values and rows
//! - [`traits`]: the connection, cursor and connector seam
//! - [`identifier`]: validation for names interpolated into SQL

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::validate_identifier;
pub use schema::{ColumnKind, ColumnMeta};
pub use traits::{Connector, DbConnection, LobSupport, PoolKey, RowCursor};
pub use value::{Row, SqlValue};
