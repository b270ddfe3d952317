//! In-memory database for engine tests.
//!
//! Understands exactly the statements [`SqlGenerator`](crate::dialect::SqlGenerator)
//! emits: `count(1)`, `SELECT *` with any of the pagination forms, and
//! `INSERT ... VALUES`. Schemas are ignored and rows come back in insertion
//! order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::{ColumnMeta, Connector, DbConnection, LobSupport, PoolKey, Row, RowCursor, SqlValue};
use crate::dialect::Dialect;
use crate::error::{MoverError, Result};
use crate::pipeline::RNUM_COLUMN;

#[derive(Default)]
struct Table {
    columns: Vec<ColumnMeta>,
    rows: Vec<Row>,
}

struct Side {
    dialect: Dialect,
    max_connections: u32,
    connects_before_failure: u32,
    failing_connects: u32,
    failing_inserts: u32,
    failing_reads: Vec<String>,
    tables: HashMap<String, Table>,
    open: usize,
    max_open: usize,
}

impl Default for Side {
    fn default() -> Self {
        Self {
            dialect: Dialect::PostgreSql,
            max_connections: 0,
            connects_before_failure: 0,
            failing_connects: 0,
            failing_inserts: 0,
            failing_reads: Vec::new(),
            tables: HashMap::new(),
            open: 0,
            max_open: 0,
        }
    }
}

#[derive(Default)]
struct Inner {
    sides: Mutex<HashMap<PoolKey, Side>>,
    connections_opened: AtomicU32,
    autocommit_disabled: AtomicU32,
    active_cursors: AtomicUsize,
    max_active_cursors: AtomicUsize,
}

/// Shared handle to the in-memory databases of both pool keys.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn sides(&self) -> MutexGuard<'_, HashMap<PoolKey, Side>> {
        self.inner.sides.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn with_side(self, key: PoolKey, f: impl FnOnce(&mut Side)) -> Self {
        f(self.sides().entry(key).or_default());
        self
    }

    pub fn with_dialect(self, key: PoolKey, dialect: Dialect) -> Self {
        self.with_side(key, |side| side.dialect = dialect)
    }

    pub fn with_max_connections(self, key: PoolKey, max: u32) -> Self {
        self.with_side(key, |side| side.max_connections = max)
    }

    /// The next `n` connection attempts for `key` fail.
    pub fn failing_connects(self, key: PoolKey, n: u32) -> Self {
        self.failing_connects_after(key, 0, n)
    }

    /// After `ok` more successful connects for `key`, the next `n` fail.
    pub fn failing_connects_after(self, key: PoolKey, ok: u32, n: u32) -> Self {
        self.with_side(key, |side| {
            side.connects_before_failure = ok;
            side.failing_connects = n;
        })
    }

    /// The next `n` batch executions for `key` fail.
    pub fn failing_inserts(self, key: PoolKey, n: u32) -> Self {
        self.with_side(key, |side| side.failing_inserts = n)
    }

    /// Every SELECT on `table` fails.
    pub fn failing_reads(self, key: PoolKey, table: &str) -> Self {
        let table = table.to_string();
        self.with_side(key, move |side| side.failing_reads.push(table))
    }

    pub fn with_table(self, key: PoolKey, name: &str, columns: Vec<ColumnMeta>, rows: Vec<Row>) -> Self {
        self.with_side(key, |side| {
            side.tables.insert(name.to_string(), Table { columns, rows });
        })
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Committed rows of `table`.
    pub fn rows(&self, key: PoolKey, table: &str) -> Vec<Row> {
        self.sides()
            .get(&key)
            .and_then(|side| side.tables.get(table))
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn connections_opened(&self) -> u32 {
        self.inner.connections_opened.load(Ordering::SeqCst)
    }

    pub fn autocommit_disabled(&self) -> u32 {
        self.inner.autocommit_disabled.load(Ordering::SeqCst)
    }

    /// Highest number of `key` connections that were alive at the same time.
    pub fn max_open(&self, key: PoolKey) -> usize {
        self.sides().get(&key).map_or(0, |side| side.max_open)
    }

    /// Highest number of cursors that were open at the same time.
    pub fn max_active_cursors(&self) -> usize {
        self.inner.max_active_cursors.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryDb {
    async fn connect(&self, key: PoolKey) -> Result<Box<dyn DbConnection>> {
        let dialect = {
            let mut sides = self.sides();
            let side = sides.entry(key).or_default();
            if side.connects_before_failure > 0 {
                side.connects_before_failure -= 1;
            } else if side.failing_connects > 0 {
                side.failing_connects -= 1;
                return Err(MoverError::connection(key, "connection refused"));
            }
            side.open += 1;
            side.max_open = side.max_open.max(side.open);
            side.dialect
        };
        self.inner.connections_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            db: self.clone(),
            key,
            dialect,
            autocommit: true,
            pending: Vec::new(),
        }))
    }
}

struct MemoryConnection {
    db: MemoryDb,
    key: PoolKey,
    dialect: Dialect,
    autocommit: bool,
    pending: Vec<(String, Row)>,
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        if let Some(side) = self.db.sides().get_mut(&self.key) {
            side.open -= 1;
        }
    }
}

impl MemoryConnection {
    fn error(&self, message: impl ToString) -> MoverError {
        MoverError::database(self.dialect, message)
    }

    fn apply_pending(&mut self) {
        let mut sides = self.db.sides();
        let side = sides.entry(self.key).or_default();
        for (table, row) in self.pending.drain(..) {
            side.tables.entry(table).or_default().rows.push(row);
        }
    }
}

/// Bare table name of the first `marker` not followed by a sub-select.
fn table_after(sql: &str, marker: &str) -> Option<String> {
    sql.match_indices(marker).find_map(|(i, _)| {
        let rest = &sql[i + marker.len()..];
        if rest.starts_with('(') {
            return None;
        }
        let name = rest.split_whitespace().next()?;
        let bare = name.rsplit('.').next()?;
        Some(bare.trim_matches('"').to_string())
    })
}

fn number_after(sql: &str, marker: &str) -> Option<usize> {
    let i = sql.find(marker)?;
    sql[i + marker.len()..].split_whitespace().next()?.parse().ok()
}

/// Row window and whether rows carry a trailing RNUM, from a page query.
fn parse_window(sql: &str, total: usize) -> (usize, usize, bool) {
    if let (Some(length), Some(start)) = (number_after(sql, " LIMIT "), number_after(sql, " OFFSET ")) {
        return (start, start + length, false);
    }
    if let (Some(start), Some(length)) = (number_after(sql, " OFFSET "), number_after(sql, " FETCH NEXT ")) {
        return (start, start + length, false);
    }
    if let (Some(end), Some(start)) = (number_after(sql, "rownum <= "), number_after(sql, "RNUM > ")) {
        return (start, end, true);
    }
    (0, total, false)
}

#[async_trait]
impl DbConnection for MemoryConnection {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn lob_support(&self) -> LobSupport {
        match self.dialect {
            Dialect::Oracle => LobSupport { blob: true, clob: true },
            _ => LobSupport::default(),
        }
    }

    async fn set_autocommit(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            self.db.inner.autocommit_disabled.fetch_add(1, Ordering::SeqCst);
        }
        self.autocommit = enabled;
        Ok(())
    }

    async fn max_connections(&mut self) -> Result<u32> {
        Ok(self.db.sides().get(&self.key).map_or(0, |s| s.max_connections))
    }

    async fn query_count(&mut self, sql: &str) -> Result<u64> {
        let table = table_after(sql, "FROM ").ok_or_else(|| self.error(format!("bad count: {sql}")))?;
        let sides = self.db.sides();
        let count = sides
            .get(&self.key)
            .and_then(|side| side.tables.get(&table))
            .map(|t| t.rows.len())
            .ok_or_else(|| self.error(format!("no table {table}")))?;
        Ok(count as u64)
    }

    async fn describe_table(&mut self, _schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        Ok(self
            .db
            .sides()
            .get(&self.key)
            .and_then(|side| side.tables.get(table))
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn open_cursor<'a>(
        &'a mut self,
        sql: &str,
        _columns: &[ColumnMeta],
        fetch_size: usize,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let table = table_after(sql, "SELECT * FROM ")
            .ok_or_else(|| self.error(format!("bad select: {sql}")))?;

        let (columns, rows) = {
            let sides = self.db.sides();
            let side = sides
                .get(&self.key)
                .ok_or_else(|| self.error("no database"))?;
            if side.failing_reads.contains(&table) {
                return Err(self.error(format!("read of {table} failed")));
            }
            let stored = side
                .tables
                .get(&table)
                .ok_or_else(|| self.error(format!("no table {table}")))?;

            let (start, end, rnum) = parse_window(sql, stored.rows.len());
            let end = end.min(stored.rows.len());
            let start = start.min(end);

            let mut columns: Vec<String> = stored.columns.iter().map(|c| c.name.clone()).collect();
            let mut rows: Vec<Row> = stored.rows[start..end].to_vec();
            if rnum {
                columns.push(RNUM_COLUMN.to_string());
                for (i, row) in rows.iter_mut().enumerate() {
                    row.push(SqlValue::Int((start + i + 1) as i64));
                }
            }
            (columns, rows)
        };

        let active = self.db.inner.active_cursors.fetch_add(1, Ordering::SeqCst) + 1;
        self.db.inner.max_active_cursors.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MemoryCursor {
            db: self.db.clone(),
            columns,
            rows: rows.into_iter(),
            fetch_size: fetch_size.max(1),
        }))
    }

    async fn execute_batch(&mut self, sql: &str, _columns: &[ColumnMeta], rows: &[Row]) -> Result<u64> {
        let table = table_after(sql, "INSERT INTO ").ok_or_else(|| self.error(format!("bad insert: {sql}")))?;
        {
            let mut sides = self.db.sides();
            let side = sides.entry(self.key).or_default();
            if side.failing_inserts > 0 {
                side.failing_inserts -= 1;
                return Err(self.error("deadlock detected"));
            }
            let width = side.tables.get(&table).map_or(0, |t| t.columns.len());
            if let Some(row) = rows.iter().find(|r| r.len() != width) {
                return Err(self.error(format!("{} values for {} columns", row.len(), width)));
            }
        }

        self.pending
            .extend(rows.iter().map(|row| (table.clone(), row.clone())));
        if self.autocommit {
            self.apply_pending();
        }
        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<()> {
        self.apply_pending();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemoryCursor {
    db: MemoryDb,
    columns: Vec<String>,
    rows: std::vec::IntoIter<Row>,
    fetch_size: usize,
}

#[async_trait]
impl RowCursor for MemoryCursor {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<Row>>> {
        // Let other workers interleave between chunks.
        tokio::task::yield_now().await;
        let chunk: Vec<Row> = self.rows.by_ref().take(self.fetch_size).collect();
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.db.inner.active_cursors.fetch_sub(1, Ordering::SeqCst);
    }
}
