//! Row pipelines: DB to CSV, CSV to DB and DB to DB.
//!
//! A pipeline is scoped to one table and shared by every page worker of
//! that table; it is dropped when the table is finished.

mod codec;
mod copy;
mod export;
mod import;
mod sidecar;

pub use codec::{find_rnum, parse_bool, parse_date, parse_timestamp, RNUM_COLUMN};
pub use copy::{CopyPipeline, LobBinding};
pub use export::ExportPipeline;
pub use import::{count_rows, ImportPipeline};
pub use sidecar::Sidecar;

/// The pipeline of the run's mode for one table.
pub enum TablePipeline {
    Export(ExportPipeline),
    Import(ImportPipeline),
    Copy(CopyPipeline),
}
