//! # table-mover
//!
//! Parallel bulk table mover between relational databases and CSV files.
//!
//! A run has one of three modes:
//!
//! - **EXPORT**: tables to CSV, with large objects in per-row sidecar files
//! - **IMPORT**: CSV files back into existing tables
//! - **COPY**: tables straight from one database to another
//!
//! Tables are dispatched to a pool of table workers; large tables are split
//! into page windows that page workers read concurrently through pooled,
//! retried connections.
//!
//! ## Example
//!
//! ```rust,no_run
//! use table_mover::{Config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> table_mover::Result<()> {
//!     let config = Config::from_dir("conf")?;
//!     let summary = Engine::new(config.engine_config())
//!         .run(config.tables.clone())
//!         .await?;
//!     println!("Moved {} rows", summary.rows_processed);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ConnectionConfig, EngineConfig, Mode, ProcessConfig};
pub use dialect::Dialect;
pub use error::{MoverError, Result};
pub use orchestrator::{Engine, RunSummary};
