//! Bounded-concurrency task runner with cancellation propagation and
//! thread-safe counters. A reusable bounded pool with an explicit
//! cancellation predicate checked at every suspension point, rather than
//! ad-hoc fire-and-forget tasks.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

/// A cooperative cancellation signal threaded through an operation.
/// Cancellation is a predicate checked at every suspension point, never
/// modeled as a raised exception.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Bounded-concurrency runner. `N = clamp(configured_parallel_tasks, 1, 10)`
/// is enforced by the caller (see [`crate::config::clamp_parallel_tasks`]);
/// the executor itself only knows its semaphore permit count.
pub struct ParallelExecutor {
    semaphore: Arc<Semaphore>,
    cancel: CancelToken,
}

impl ParallelExecutor {
    pub fn new(bound: u32, cancel: CancelToken) -> Self {
        ParallelExecutor {
            semaphore: Arc::new(Semaphore::new(bound.max(1) as usize)),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `units` (each an independent, owned future-producing thunk) with
    /// at most the configured bound in flight at once. Checks cancellation
    /// before launching each new unit; in-flight units are always allowed
    /// to finish. Returns the per-unit results in the order the units were
    /// given (not necessarily the order they completed).
    pub async fn run_all<T, F, Fut>(&self, units: Vec<T>, work: F) -> Vec<Option<Fut::Output>>
    where
        T: Send + 'static,
        F: Fn(T, CancelToken) -> Fut + Send + Sync + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let work = Arc::new(work);
        let mut handles = Vec::with_capacity(units.len());

        for (index, unit) in units.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                handles.push((index, None));
                continue;
            }
            let permit = match self.semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    handles.push((index, None));
                    continue;
                }
            };
            let cancel = self.cancel.clone();
            let work = Arc::clone(&work);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                work(unit, cancel).await
            });
            handles.push((index, Some(handle)));
        }

        let mut results: Vec<Option<Fut::Output>> = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            match handle {
                Some(h) => results.push(h.await.ok()),
                None => results.push(None),
            }
        }
        results
    }
}

/// Atomic counter set shared across workers (spec §4.6/§5).
#[derive(Default)]
pub struct AtomicCounters {
    pub files_listed: std::sync::atomic::AtomicU64,
    pub unsupported_skipped: std::sync::atomic::AtomicU64,
    pub files_copied: std::sync::atomic::AtomicU64,
    pub copy_errors: std::sync::atomic::AtomicU64,
    pub download_attempts: std::sync::atomic::AtomicU64,
    pub successful_downloads: std::sync::atomic::AtomicU64,
    pub failed_downloads: std::sync::atomic::AtomicU64,
    pub total_bytes_copied: std::sync::atomic::AtomicU64,
    pub total_bytes_downloaded: std::sync::atomic::AtomicU64,
}

impl AtomicCounters {
    pub fn inc(counter: &std::sync::atomic::AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get(counter: &std::sync::atomic::AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let cancel = CancelToken::new();
        let executor = ParallelExecutor::new(2, cancel);
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let units: Vec<u32> = (0..8).collect();
        let in_flight_c = in_flight.clone();
        let max_seen_c = max_seen.clone();
        executor
            .run_all(units, move |_unit, _cancel| {
                let in_flight = in_flight_c.clone();
                let max_seen = max_seen_c.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_new_work() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let executor = ParallelExecutor::new(4, cancel);
        let ran = Arc::new(AtomicU32::new(0));
        let ran_c = ran.clone();

        let results = executor
            .run_all(vec![1, 2, 3], move |_u, _c| {
                let ran = ran_c.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(results.iter().all(|r| r.is_none()));
    }
}
