//! Per-operation context: a single struct carrying cancellation, the
//! bounded executor, and atomic counters, passed explicitly to every
//! phase rather than reached through module-level statics.

use crate::config::clamp_parallel_tasks;
use crate::executor::{AtomicCounters, CancelToken, ParallelExecutor};
use std::sync::Arc;

pub struct OperationContext {
    pub cancel: CancelToken,
    pub executor: ParallelExecutor,
    pub counters: Arc<AtomicCounters>,
}

impl OperationContext {
    pub fn new(requested_parallel_tasks: i64) -> Self {
        let cancel = CancelToken::new();
        let bound = clamp_parallel_tasks(requested_parallel_tasks);
        OperationContext {
            executor: ParallelExecutor::new(bound, cancel.clone()),
            cancel,
            counters: Arc::new(AtomicCounters::default()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// The outcome every operation returns.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub success: bool,
    pub cancelled: bool,
    pub elapsed: std::time::Duration,
    pub counters: CounterSnapshot,
}

#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub files_listed: u64,
    pub unsupported_skipped: u64,
    pub files_copied: u64,
    pub copy_errors: u64,
    pub download_attempts: u64,
    pub successful_downloads: u64,
    pub failed_downloads: u64,
    pub total_bytes_copied: u64,
    pub total_bytes_downloaded: u64,
    /// Restore-only: manifest entries whose local member was missing or
    /// whose target folder could not be resolved.
    pub files_skipped: u64,
    /// Restore-only: entries already present in `completed_archive_paths`
    /// before this run started.
    pub files_already_done: u64,
    /// Repair-only: missing entries whose archive-path stem failed the
    /// id validity check.
    pub repairs_skipped_no_id: u64,
}

impl CounterSnapshot {
    pub fn from_counters(c: &AtomicCounters) -> Self {
        CounterSnapshot {
            files_listed: AtomicCounters::get(&c.files_listed),
            unsupported_skipped: AtomicCounters::get(&c.unsupported_skipped),
            files_copied: AtomicCounters::get(&c.files_copied),
            copy_errors: AtomicCounters::get(&c.copy_errors),
            download_attempts: AtomicCounters::get(&c.download_attempts),
            successful_downloads: AtomicCounters::get(&c.successful_downloads),
            failed_downloads: AtomicCounters::get(&c.failed_downloads),
            total_bytes_copied: AtomicCounters::get(&c.total_bytes_copied),
            total_bytes_downloaded: AtomicCounters::get(&c.total_bytes_downloaded),
            files_skipped: 0,
            files_already_done: 0,
            repairs_skipped_no_id: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_clamps_bound() {
        let ctx = OperationContext::new(1_000_000);
        // no direct accessor for the clamped bound on ParallelExecutor;
        // this just checks construction does not panic at the extreme.
        assert!(!ctx.is_cancelled());
    }
}
