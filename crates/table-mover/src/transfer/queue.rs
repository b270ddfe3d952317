//! Shared work queues: table names for table workers, page windows for
//! page workers. Every pop is destructive, so a unit of work is handed out
//! exactly once.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A contiguous range of rows `[start, start + length)` under `ORDER BY 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub index: usize,
    pub start: u64,
    pub length: u64,
}

/// Partition `[0, row_count)` into windows of `page_size` rows.
///
/// The last window is short when `row_count` is not a multiple of
/// `page_size`; an empty table yields no windows.
pub fn compute_pages(row_count: u64, page_size: u64) -> Vec<PageWindow> {
    let page_size = page_size.max(1);
    let mut pages = Vec::with_capacity(page_count(row_count, page_size));
    let mut start = 0;

    while start < row_count {
        let length = page_size.min(row_count - start);
        pages.push(PageWindow {
            index: pages.len(),
            start,
            length,
        });
        start += length;
    }

    pages
}

/// Windows for a paginated import.
///
/// A CSV file has no row offsets to seek to, so every window covers the
/// whole file and the page workers share one line reader; the window count
/// only sizes the worker set.
pub fn import_windows(row_count: u64, page_size: u64) -> Vec<PageWindow> {
    (0..page_count(row_count, page_size))
        .map(|index| PageWindow {
            index,
            start: 0,
            length: row_count,
        })
        .collect()
}

/// `ceil(row_count / page_size)`.
pub fn page_count(row_count: u64, page_size: u64) -> usize {
    row_count.div_ceil(page_size.max(1)) as usize
}

/// Ordered table names awaiting a table worker.
#[derive(Debug, Default)]
pub struct TableQueue {
    tables: Mutex<VecDeque<String>>,
}

impl TableQueue {
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: Mutex::new(tables.into_iter().map(Into::into).collect()),
        }
    }

    pub fn pop_next(&self) -> Option<String> {
        lock(&self.tables).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.tables).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Page windows per table awaiting a page worker.
#[derive(Debug, Default)]
pub struct PageQueue {
    pages: Mutex<HashMap<String, VecDeque<PageWindow>>>,
}

impl PageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending windows for `table`.
    pub fn publish(&self, table: &str, windows: Vec<PageWindow>) {
        lock(&self.pages).insert(table.to_string(), windows.into());
    }

    /// Pop the next window for `table`; the entry is dropped once drained.
    pub fn pop_next(&self, table: &str) -> Option<PageWindow> {
        let mut pages = lock(&self.pages);
        let queue = pages.get_mut(table)?;
        let window = queue.pop_front();
        if queue.is_empty() {
            pages.remove(table);
        }
        window
    }

    /// Drop windows nobody picked up; returns how many there were.
    pub fn discard(&self, table: &str) -> usize {
        lock(&self.pages).remove(table).map_or(0, |q| q.len())
    }
}

/// Lock a queue, recovering from a poisoned mutex.
///
/// A panicking worker never leaves a queue half-modified (each operation
/// is a single `VecDeque`/`HashMap` call), so the data is still valid.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_pages_partition_rows() {
        for (rows, size) in [(0, 10), (1, 10), (10, 10), (11, 10), (2500, 1000), (99, 7)] {
            let pages = compute_pages(rows, size);
            assert_eq!(pages.len(), page_count(rows, size));
            assert_eq!(pages.iter().map(|p| p.length).sum::<u64>(), rows);

            for (i, page) in pages.iter().enumerate() {
                assert_eq!(page.index, i);
                assert_eq!(page.start, i as u64 * size);
            }
        }
    }

    #[test]
    fn test_paginated_export_windows() {
        let pages = compute_pages(2500, 1000);
        assert_eq!(
            pages,
            vec![
                PageWindow { index: 0, start: 0, length: 1000 },
                PageWindow { index: 1, start: 1000, length: 1000 },
                PageWindow { index: 2, start: 2000, length: 500 },
            ]
        );
    }

    #[test]
    fn test_import_windows_share_the_file() {
        let windows = import_windows(2500, 1000);
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|w| w.start == 0 && w.length == 2500));
        assert_eq!(windows[2].index, 2);
    }

    #[test]
    fn test_table_queue_order() {
        let queue = TableQueue::new(["T1", "T2"]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_next().as_deref(), Some("T1"));
        assert_eq!(queue.pop_next().as_deref(), Some("T2"));
        assert_eq!(queue.pop_next(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_page_queue_pop_empty() {
        let queue = PageQueue::new();
        assert_eq!(queue.pop_next("T1"), None);

        queue.publish("T1", compute_pages(15, 10));
        assert_eq!(queue.pop_next("T1").map(|w| w.start), Some(0));
        assert_eq!(queue.pop_next("T2"), None);
        assert_eq!(queue.pop_next("T1").map(|w| w.length), Some(5));
        assert_eq!(queue.pop_next("T1"), None);
    }

    #[test]
    fn test_page_queue_discard_counts_unclaimed() {
        let queue = PageQueue::new();
        queue.publish("T1", compute_pages(30, 10));
        queue.pop_next("T1");
        assert_eq!(queue.discard("T1"), 2);
        assert_eq!(queue.discard("T1"), 0);
        assert_eq!(queue.pop_next("T1"), None);
    }

    #[test]
    fn test_page_queue_no_window_twice_under_contention() {
        let queue = Arc::new(PageQueue::new());
        queue.publish("T1", compute_pages(10_000, 7));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(window) = queue.pop_next("T1") {
                        seen.push(window.index);
                    }
                    seen
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().copied().collect();
        assert_eq!(all.len(), page_count(10_000, 7));
        assert_eq!(unique.len(), all.len());
    }
}
