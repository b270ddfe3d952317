//! Table workers: prepare a table, then move it in one shot or fan its
//! pages out to page workers.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::page::{execute, PageWorker};
use super::{compute_pages, format_count, import_windows, lease, ProgressTracker, TableJob};
use crate::config::Mode;
use crate::core::{ColumnMeta, DbConnection, PoolKey};
use crate::dialect::SqlGenerator;
use crate::error::{MoverError, Result};
use crate::orchestrator::EngineContext;
use crate::pipeline::{count_rows, CopyPipeline, ExportPipeline, ImportPipeline, TablePipeline};

/// Result of moving one table.
#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub rows: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Drains the table queue.
pub struct TableWorker {
    id: usize,
    ctx: Arc<EngineContext>,
}

impl TableWorker {
    pub fn new(id: usize, ctx: Arc<EngineContext>) -> Self {
        Self { id, ctx }
    }

    /// Move tables until the queue is empty. A failed table is reported in
    /// its outcome and the worker moves on.
    pub async fn run(self) -> Vec<TableOutcome> {
        let mut outcomes = Vec::new();
        while let Some(table) = self.ctx.tables.pop_next() {
            debug!("Table worker {}: starting {}", self.id, table);
            let started = Instant::now();
            let result = self.move_table(&table).await;
            let duration = started.elapsed();

            let outcome = match result {
                Ok(rows) => {
                    debug!(
                        "Table worker {}: {} done, {} rows in {:.1}s",
                        self.id,
                        table,
                        format_count(rows),
                        duration.as_secs_f64()
                    );
                    TableOutcome {
                        table,
                        rows,
                        duration,
                        error: None,
                    }
                }
                Err((rows, message)) => {
                    error!("{}: {}", table, message);
                    TableOutcome {
                        table,
                        rows,
                        duration,
                        error: Some(message),
                    }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Rows moved, or the rows moved before failing plus the reason.
    async fn move_table(&self, table: &str) -> std::result::Result<u64, (u64, String)> {
        let job = prepare(&self.ctx, table)
            .await
            .map_err(|e| (0, e.to_string()))?;
        let job = Arc::new(job);

        let moved = if paginate(&self.ctx, &job) {
            self.run_pages(&job).await
        } else {
            execute(&self.ctx, &job, None).await.map(|_| job.progress.rows())
        };
        let finished = finish(&job).await;

        let rows = job.progress.rows();
        match (moved, finished) {
            (Ok(rows), Ok(())) => Ok(rows),
            (Err(e), _) | (Ok(_), Err(e)) => {
                let message = match job.take_failure() {
                    Some(cause) => format!("{} (first failure: {})", e, cause),
                    None => e.to_string(),
                };
                Err((rows, message))
            }
        }
    }

    async fn run_pages(&self, job: &Arc<TableJob>) -> Result<u64> {
        let page_size = self.ctx.config.page_size;
        let windows = match job.mode {
            Mode::Import => import_windows(job.row_count, page_size),
            Mode::Export | Mode::Copy => compute_pages(job.row_count, page_size),
        };
        let expected = windows.len();
        let workers = self.ctx.config.parallel_pages.min(expected).max(1);
        debug!(
            "{}: {} pages of up to {} rows, {} page workers",
            job.label, expected, page_size, workers
        );
        self.ctx.pages.publish(&job.name, windows);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = PageWorker::new(id, Arc::clone(&self.ctx), Arc::clone(job));
            handles.push(tokio::spawn(worker.run()));
        }

        let mut completed = 0;
        for handle in handles {
            match handle.await {
                Ok(n) => completed += n,
                Err(e) => {
                    error!("{}: page worker panicked: {}", job.label, e);
                    job.record_failure(format!("page worker panicked: {}", e));
                }
            }
        }

        let abandoned = self.ctx.pages.discard(&job.name);
        if abandoned > 0 {
            warn!("{}: {} pages were never started", job.label, abandoned);
        }

        if completed != expected {
            return Err(MoverError::TableFailed {
                table: job.label.clone(),
                expected,
                actual: completed,
            });
        }
        Ok(job.progress.rows())
    }
}

/// Whether a table is split into page windows.
fn paginate(ctx: &EngineContext, job: &TableJob) -> bool {
    if job.row_count <= ctx.config.page_size {
        return false;
    }
    if job.mode != Mode::Import && !job.sql.dialect().supports_pagination() {
        warn!(
            "{}: no pagination syntax for {}, reading {} rows in one pass",
            job.label,
            job.sql.dialect(),
            format_count(job.row_count)
        );
        return false;
    }
    true
}

async fn finish(job: &TableJob) -> Result<()> {
    match &job.pipeline {
        TablePipeline::Export(pipeline) => {
            let rows = pipeline.finish().await?;
            debug!("{}: {} rows in {}", job.label, rows, pipeline.csv_path().display());
        }
        TablePipeline::Import(pipeline) => debug!(
            "{}: {} lines read from {}",
            job.label,
            pipeline.lines_read(),
            pipeline.csv_path().display()
        ),
        TablePipeline::Copy(_) => {}
    }
    Ok(())
}

/// Qualified name used in log lines and errors.
fn label(schema: &str, table: &str) -> String {
    if schema.trim().is_empty() {
        table.to_string()
    } else {
        format!("{}.{}", schema, table)
    }
}

async fn describe(conn: &mut dyn DbConnection, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
    let columns = conn.describe_table(schema, table).await?;
    if columns.is_empty() {
        return Err(MoverError::database(
            conn.dialect(),
            format!("table {} not found or has no columns", label(schema, table)),
        ));
    }
    Ok(columns)
}

/// Read metadata and row count, and set up the pipeline for `table`.
async fn prepare(ctx: &EngineContext, table: &str) -> Result<TableJob> {
    let config = &ctx.config;
    let source_schema = config.source.schema.as_str();
    let destination_schema = config.destination.schema.as_str();
    let csv_path = config.path.join(format!("{}.csv", table));

    match config.mode {
        Mode::Export => {
            let mut source = lease(ctx, PoolKey::Source).await?;
            let sql = SqlGenerator::new(source.dialect());
            let columns = describe(&mut **source, source_schema, table).await?;
            let row_count = source
                .query_count(&sql.row_count(source_schema, table))
                .await?;
            source.commit().await?;
            drop(source);

            let label = label(source_schema, table);
            let pipeline =
                ExportPipeline::create(&label, csv_path, config.flush_interval()).await?;
            Ok(job(
                table,
                label,
                config.mode,
                sql,
                columns,
                Vec::new(),
                None,
                row_count,
                TablePipeline::Export(pipeline),
            ))
        }
        Mode::Import => {
            let mut destination = lease(ctx, PoolKey::Destination).await?;
            let sql = SqlGenerator::new(destination.dialect());
            let columns = describe(&mut **destination, destination_schema, table).await?;
            destination.commit().await?;
            drop(destination);

            let label = label(destination_schema, table);
            let insert = sql.insert_values(destination_schema, table, columns.len());
            let row_count = count_rows(&csv_path).await?;
            let pipeline = ImportPipeline::open(&label, csv_path, columns.clone()).await?;
            Ok(job(
                table,
                label,
                config.mode,
                sql,
                Vec::new(),
                columns,
                Some(insert),
                row_count,
                TablePipeline::Import(pipeline),
            ))
        }
        Mode::Copy => {
            let mut source = lease(ctx, PoolKey::Source).await?;
            let sql = SqlGenerator::new(source.dialect());
            let source_columns = describe(&mut **source, source_schema, table).await?;
            let row_count = source
                .query_count(&sql.row_count(source_schema, table))
                .await?;
            source.commit().await?;
            drop(source);

            let mut destination = lease(ctx, PoolKey::Destination).await?;
            let insert_sql = SqlGenerator::new(destination.dialect());
            let destination_columns =
                describe(&mut **destination, destination_schema, table).await?;
            let lob_support = destination.lob_support();
            destination.commit().await?;
            drop(destination);

            let label = label(source_schema, table);
            let insert =
                insert_sql.insert_values(destination_schema, table, destination_columns.len());
            let pipeline = CopyPipeline::new(&label, source_columns.clone(), lob_support);
            Ok(job(
                table,
                label,
                config.mode,
                sql,
                source_columns,
                destination_columns,
                Some(insert),
                row_count,
                TablePipeline::Copy(pipeline),
            ))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn job(
    table: &str,
    label: String,
    mode: Mode,
    sql: SqlGenerator,
    read_columns: Vec<ColumnMeta>,
    write_columns: Vec<ColumnMeta>,
    insert_sql: Option<String>,
    row_count: u64,
    pipeline: TablePipeline,
) -> TableJob {
    debug!(
        "{}: {} rows, {} columns",
        label,
        format_count(row_count),
        read_columns.len().max(write_columns.len())
    );
    TableJob {
        name: table.to_string(),
        progress: ProgressTracker::new(label.clone(), row_count),
        label,
        mode,
        sql,
        read_columns,
        write_columns,
        insert_sql,
        row_count,
        pipeline,
        failure: Mutex::new(None),
    }
}
