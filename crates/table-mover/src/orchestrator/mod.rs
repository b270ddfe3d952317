//! Run coordinator: builds the pools, starts the table workers and
//! aggregates their outcomes.

mod pools;

pub use pools::{ConnectionBroker, DriverManager, Lease};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::{EngineConfig, Mode};
use crate::core::{Connector, PoolKey};
use crate::drivers::UrlConnector;
use crate::error::Result;
use crate::transfer::{format_count, PageQueue, TableOutcome, TableQueue, TableWorker};

/// State shared by every worker of a run.
pub struct EngineContext {
    pub config: EngineConfig,
    pub broker: ConnectionBroker,
    pub tables: TableQueue,
    pub pages: PageQueue,
}

/// Moves a list of tables in the configured mode.
pub struct Engine {
    config: EngineConfig,
    connector: Arc<dyn Connector>,
}

/// One table that did not complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedTable {
    pub table: String,
    pub error: String,
}

/// Rows moved for one completed table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSummary {
    pub table: String,
    pub rows: u64,
    pub duration_seconds: f64,
}

/// Result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: Mode,

    /// `completed` or `completed_with_errors`.
    pub status: String,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub tables_total: usize,

    pub tables_success: usize,

    pub tables_failed: usize,

    /// Rows moved across all tables, failed ones included.
    pub rows_processed: u64,

    /// Average throughput (rows/second).
    pub rows_per_second: u64,

    pub tables: Vec<TableSummary>,

    pub failed_tables: Vec<FailedTable>,
}

impl RunSummary {
    fn build(
        run_id: String,
        mode: Mode,
        started_at: DateTime<Utc>,
        requested: &[String],
        outcomes: Vec<TableOutcome>,
    ) -> Self {
        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let mut tables = Vec::new();
        let mut failed_tables = Vec::new();
        let mut rows_processed = 0;
        let mut reported = HashSet::new();

        for outcome in outcomes {
            rows_processed += outcome.rows;
            reported.insert(outcome.table.clone());
            match outcome.error {
                None => tables.push(TableSummary {
                    table: outcome.table,
                    rows: outcome.rows,
                    duration_seconds: outcome.duration.as_secs_f64(),
                }),
                Some(error) => failed_tables.push(FailedTable {
                    table: outcome.table,
                    error,
                }),
            }
        }

        // A table worker that panicked took its current table with it.
        for table in requested {
            if !reported.contains(table) {
                failed_tables.push(FailedTable {
                    table: table.clone(),
                    error: "table worker panicked".to_string(),
                });
                reported.insert(table.clone());
            }
        }

        let rows_per_second = if duration > 0.0 {
            (rows_processed as f64 / duration) as u64
        } else {
            0
        };

        let status = if failed_tables.is_empty() {
            "completed"
        } else {
            "completed_with_errors"
        };

        Self {
            run_id,
            mode,
            status: status.to_string(),
            duration_seconds: duration,
            started_at,
            completed_at,
            tables_total: requested.len(),
            tables_success: tables.len(),
            tables_failed: failed_tables.len(),
            rows_processed,
            rows_per_second,
            tables,
            failed_tables,
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Engine {
    /// Engine connecting through the drivers selected by the configured URLs.
    pub fn new(config: EngineConfig) -> Self {
        let connector = Arc::new(UrlConnector::new(
            config.source.clone(),
            config.destination.clone(),
        ));
        Self { config, connector }
    }

    /// Replace how connections are opened.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Move `tables` and report per-table results.
    ///
    /// Setup failures (output directory, first connects) abort the run; a table
    /// failure is recorded in the summary and the remaining tables continue.
    pub async fn run(self, tables: Vec<String>) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mode = self.config.mode;

        info!(
            "Starting {} run {}: {} tables",
            mode,
            run_id,
            tables.len()
        );

        if tables.is_empty() {
            info!("No tables configured, nothing to do");
            return Ok(RunSummary::build(run_id, mode, started_at, &tables, Vec::new()));
        }

        if mode.uses_files() {
            tokio::fs::create_dir_all(&self.config.path).await?;
        }

        let mut keys = Vec::new();
        if mode.uses_source() {
            keys.push(PoolKey::Source);
        }
        if mode.uses_destination() {
            keys.push(PoolKey::Destination);
        }
        let broker =
            ConnectionBroker::connect(self.connector, &keys, self.config.max_connections).await?;

        let workers = self.config.parallel_tables.min(tables.len()).max(1);
        let ctx = Arc::new(EngineContext {
            config: self.config,
            broker,
            tables: TableQueue::new(tables.iter().cloned()),
            pages: PageQueue::new(),
        });
        info!("Processing tables with {} table workers", workers);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = TableWorker::new(id, Arc::clone(&ctx));
            handles.push(tokio::spawn(worker.run()));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(done) => outcomes.extend(done),
                Err(e) => error!("Table worker panicked - {}", e),
            }
        }
        drop(ctx);

        let summary = RunSummary::build(run_id, mode, started_at, &tables, outcomes);
        info!(
            "{} {}: {}/{} tables, {} rows in {:.1}s ({} rows/s)",
            summary.mode,
            summary.status,
            summary.tables_success,
            summary.tables_total,
            format_count(summary.rows_processed),
            summary.duration_seconds,
            format_count(summary.rows_per_second)
        );
        Ok(summary)
    }
}
