//! Per-table row progress, logged at roughly one-percent steps.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Shared row counter for one table; cloned into every page worker behind
/// an `Arc`.
#[derive(Debug)]
pub struct ProgressTracker {
    table: String,
    total: u64,
    rows: AtomicU64,
    last_percent: AtomicU64,
}

impl ProgressTracker {
    pub fn new(table: impl Into<String>, total: u64) -> Self {
        Self {
            table: table.into(),
            total,
            rows: AtomicU64::new(0),
            last_percent: AtomicU64::new(0),
        }
    }

    /// Count `n` more rows and log when a new whole percent is reached.
    pub fn add(&self, n: u64) {
        let rows = self.rows.fetch_add(n, Ordering::Relaxed) + n;
        if self.total == 0 {
            return;
        }

        let percent = (rows.min(self.total) * 100) / self.total;
        let previous = self.last_percent.fetch_max(percent, Ordering::Relaxed);
        if percent > previous {
            debug!(
                "{}: {}% ({} of {} rows)",
                self.table,
                percent,
                format_count(rows),
                format_count(self.total)
            );
        }
    }

    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

/// Thousands-separated row count for log lines.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
