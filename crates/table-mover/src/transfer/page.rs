//! Page workers and the per-window transfer loops.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::{fetch_size, lease, RetryPolicy, TableJob};
use crate::core::{DbConnection, PoolKey, Row};
use crate::error::{MoverError, Result};
use crate::orchestrator::EngineContext;
use crate::pipeline::{find_rnum, CopyPipeline, ExportPipeline, ImportPipeline, TablePipeline};
use crate::transfer::PageWindow;

/// Drains one table's page queue.
pub struct PageWorker {
    id: usize,
    ctx: Arc<EngineContext>,
    job: Arc<TableJob>,
}

impl PageWorker {
    pub fn new(id: usize, ctx: Arc<EngineContext>, job: Arc<TableJob>) -> Self {
        Self { id, ctx, job }
    }

    /// Process windows until the queue is empty or one fails.
    ///
    /// Returns the number of windows completed. A failed window is not
    /// re-queued; the worker stops at the first failure.
    pub async fn run(self) -> usize {
        let mut completed = 0;
        while let Some(window) = self.ctx.pages.pop_next(&self.job.name) {
            debug!(
                "{}: page worker {} starting page {} (offset {}, {} rows)",
                self.job.label, self.id, window.index, window.start, window.length
            );

            match execute(&self.ctx, &self.job, Some(&window)).await {
                Ok(rows) => {
                    completed += 1;
                    debug!(
                        "{}: page {} done ({} rows)",
                        self.job.label, window.index, rows
                    );
                }
                Err(e) => {
                    error!("{}: page {} failed - {}", self.job.label, window.index, e);
                    self.job
                        .record_failure(format!("page {}: {}", window.index, e));
                    return completed;
                }
            }
        }
        completed
    }
}

/// Move one window of a table, or the whole table when `window` is `None`.
pub async fn execute(ctx: &EngineContext, job: &TableJob, window: Option<&PageWindow>) -> Result<u64> {
    match &job.pipeline {
        TablePipeline::Export(pipeline) => export_window(ctx, job, pipeline, window).await,
        TablePipeline::Copy(pipeline) => copy_window(ctx, job, pipeline, window).await,
        TablePipeline::Import(pipeline) => import_window(ctx, job, pipeline).await,
    }
}

fn select_sql(ctx: &EngineContext, job: &TableJob, window: Option<&PageWindow>) -> String {
    let schema = &ctx.config.source.schema;
    match window {
        Some(window) => job.sql.page(schema, &job.name, window),
        None => job.sql.select_all(schema, &job.name),
    }
}

fn window_fetch_size(ctx: &EngineContext, job: &TableJob, window: Option<&PageWindow>) -> usize {
    let rows = window.map_or(job.row_count, |w| w.length);
    fetch_size(ctx.config.fetch_size, rows)
}

async fn export_window(
    ctx: &EngineContext,
    job: &TableJob,
    pipeline: &ExportPipeline,
    window: Option<&PageWindow>,
) -> Result<u64> {
    let mut source = lease(ctx, PoolKey::Source).await?;
    let sql = select_sql(ctx, job, window);
    let fetch = window_fetch_size(ctx, job, window);

    let result = stream_export(&mut **source, job, pipeline, &sql, fetch).await;
    end_transaction(&mut **source, result).await
}

async fn stream_export(
    source: &mut dyn DbConnection,
    job: &TableJob,
    pipeline: &ExportPipeline,
    sql: &str,
    fetch: usize,
) -> Result<u64> {
    let mut cursor = source.open_cursor(sql, &job.read_columns, fetch).await?;
    let skip = find_rnum(cursor.columns(), job.read_columns.len());

    let mut rows = 0;
    while let Some(chunk) = cursor.next_chunk().await? {
        let written = pipeline.write_rows(&job.read_columns, &chunk, skip).await?;
        job.progress.add(written);
        rows += written;
    }
    Ok(rows)
}

async fn copy_window(
    ctx: &EngineContext,
    job: &TableJob,
    pipeline: &CopyPipeline,
    window: Option<&PageWindow>,
) -> Result<u64> {
    let mut source = lease(ctx, PoolKey::Source).await?;
    let mut destination = lease(ctx, PoolKey::Destination).await?;
    let sql = select_sql(ctx, job, window);
    let fetch = window_fetch_size(ctx, job, window);
    let interval = ctx.config.flush_interval() as usize;

    let result = stream_copy(
        &mut **source,
        &mut **destination,
        job,
        pipeline,
        &sql,
        fetch,
        interval,
    )
    .await;

    let written = end_transaction(&mut **destination, result).await;
    close_read(&mut **source, written.is_ok()).await;
    written
}

async fn stream_copy(
    source: &mut dyn DbConnection,
    destination: &mut dyn DbConnection,
    job: &TableJob,
    pipeline: &CopyPipeline,
    sql: &str,
    fetch: usize,
    interval: usize,
) -> Result<u64> {
    let mut cursor = source.open_cursor(sql, &job.read_columns, fetch).await?;
    let skip = find_rnum(cursor.columns(), job.read_columns.len());

    let mut batch: Vec<Row> = Vec::with_capacity(interval.min(fetch));
    let mut rows = 0;
    while let Some(chunk) = cursor.next_chunk().await? {
        for row in chunk {
            batch.push(pipeline.convert(row, skip)?);
            if batch.len() >= interval {
                rows += flush_batch(destination, job, &mut batch).await?;
            }
        }
    }
    rows += flush_batch(destination, job, &mut batch).await?;
    Ok(rows)
}

async fn import_window(ctx: &EngineContext, job: &TableJob, pipeline: &ImportPipeline) -> Result<u64> {
    let mut destination = lease(ctx, PoolKey::Destination).await?;
    let interval = ctx.config.flush_interval() as usize;

    let result = stream_import(&mut **destination, job, pipeline, interval).await;
    end_transaction(&mut **destination, result).await
}

async fn stream_import(
    destination: &mut dyn DbConnection,
    job: &TableJob,
    pipeline: &ImportPipeline,
    interval: usize,
) -> Result<u64> {
    let mut batch: Vec<Row> = Vec::with_capacity(interval);
    let mut rows = 0;
    while let Some(row) = pipeline.next_row().await? {
        batch.push(row);
        if batch.len() >= interval {
            rows += flush_batch(destination, job, &mut batch).await?;
        }
    }
    rows += flush_batch(destination, job, &mut batch).await?;
    Ok(rows)
}

/// Execute and commit one batch, retrying a failed execution after a
/// rollback. Clears `batch` on success.
async fn flush_batch(destination: &mut dyn DbConnection, job: &TableJob, batch: &mut Vec<Row>) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    let sql = job.insert_sql.as_deref().ok_or_else(|| {
        MoverError::Unsupported(format!("{}: no INSERT prepared for this mode", job.label))
    })?;

    let mut backoff = RetryPolicy::BATCH_EXECUTE.backoff();
    loop {
        let attempt = match destination.execute_batch(sql, &job.write_columns, batch).await {
            Ok(_) => destination.commit().await,
            Err(e) => Err(e),
        };

        match attempt {
            Ok(()) => break,
            Err(e) => {
                if let Err(rb) = destination.rollback().await {
                    debug!("{}: rollback after failed batch: {}", job.label, rb);
                }
                match backoff.on_failure() {
                    Some(delay) => {
                        warn!(
                            "{}: batch of {} rows failed (attempt {}), retrying in {:?}: {}",
                            job.label,
                            batch.len(),
                            backoff.failures(),
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(MoverError::retry_exhausted(
                            format!("insert batch into {}", job.label),
                            backoff.failures(),
                            e,
                        ));
                    }
                }
            }
        }
    }

    let rows = batch.len() as u64;
    job.progress.add(rows);
    batch.clear();
    Ok(rows)
}

/// Commit after success, roll back after failure; the original error wins.
async fn end_transaction(conn: &mut dyn DbConnection, result: Result<u64>) -> Result<u64> {
    match result {
        Ok(rows) => {
            conn.commit().await?;
            Ok(rows)
        }
        Err(e) => {
            if let Err(rb) = conn.rollback().await {
                debug!("rollback after failure also failed: {}", rb);
            }
            Err(e)
        }
    }
}

/// End the read-only transaction of a copy's source connection.
async fn close_read(source: &mut dyn DbConnection, succeeded: bool) {
    let closed = if succeeded {
        source.commit().await
    } else {
        source.rollback().await
    };
    if let Err(e) = closed {
        debug!("closing source read transaction failed: {}", e);
    }
}
