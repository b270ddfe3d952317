//! Two-level worker pool: table workers drain the table queue, and each
//! paginated table fans out to page workers that drain its page queue.
//!
//! Workers never re-queue work. A failed page ends its worker, which
//! reports how many windows it finished; the table worker compares the sum
//! against the number of windows it published.

mod page;
mod progress;
mod queue;
mod retry;
mod table;

pub use page::PageWorker;
pub use progress::{format_count, ProgressTracker};
pub use queue::{compute_pages, import_windows, page_count, PageQueue, PageWindow, TableQueue};
pub use retry::{Backoff, RetryCaller, RetryPolicy, MAX_BACKOFF};
pub use table::{TableOutcome, TableWorker};

use std::sync::Mutex;

use crate::config::Mode;
use crate::core::{ColumnMeta, PoolKey};
use crate::dialect::SqlGenerator;
use crate::error::Result;
use crate::orchestrator::{EngineContext, Lease};
use crate::pipeline::TablePipeline;

/// Everything the workers of one table share.
pub struct TableJob {
    /// Table name as configured.
    pub name: String,

    /// Qualified name for log lines.
    pub label: String,

    pub mode: Mode,

    /// Statement builder for the side that is read (source for export and
    /// copy, destination for import).
    pub sql: SqlGenerator,

    /// Columns of the table being read from a database.
    pub read_columns: Vec<ColumnMeta>,

    /// Columns of the destination table.
    pub write_columns: Vec<ColumnMeta>,

    /// Prepared INSERT for import and copy.
    pub insert_sql: Option<String>,

    pub row_count: u64,

    pub pipeline: TablePipeline,

    pub progress: ProgressTracker,

    /// First page failure, kept for the run summary.
    pub failure: Mutex<Option<String>>,
}

impl TableJob {
    pub fn record_failure(&self, message: String) {
        let mut failure = self.failure.lock().unwrap_or_else(|p| p.into_inner());
        failure.get_or_insert(message);
    }

    pub fn take_failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

/// Lease a connection for `key`, retrying with the key's lease policy.
pub async fn lease(ctx: &EngineContext, key: PoolKey) -> Result<Lease> {
    let policy = match key {
        PoolKey::Source => RetryPolicy::SOURCE_LEASE,
        PoolKey::Destination => RetryPolicy::DESTINATION_LEASE,
    };
    RetryCaller::new(format!("lease {} connection", key), policy)
        .call(|| ctx.broker.lease(key))
        .await
}

/// Statement fetch size for a window of `rows` rows: `max(1, min(configured, rows))`.
pub fn fetch_size(configured: usize, rows: u64) -> usize {
    (configured as u64).min(rows).max(1) as usize
}
