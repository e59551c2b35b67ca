//! Worker pool orchestrator
//!
//! Runs a worker once per item with bounded concurrency and converts every
//! outcome (value, error, panic) into a [`BatchResult`]. A failing item never
//! aborts its siblings.
//!
//! Two pool kinds:
//! - [`PoolKind::Dedicated`]: a rayon pool built for this call, sized by
//!   `max_workers` (default: one thread per item, capped at the available
//!   parallelism). Used for per-file batches;
//!   partial results travel back by value and are aggregated by the caller.
//! - [`PoolKind::Shared`]: runs on the enclosing rayon pool. Used for fine-grained
//!   work inside a single file (per-row pixel classification), where building a
//!   pool per call would cost more than the work itself. `max_workers` caps the
//!   number of concurrently running chunks.
//!
//! Outcomes are collected in completion order, which differs from submission order.

use crate::error::{ExtractError, ExtractResult};
use patx_common::{ExecutorConfig, PoolKind};
use rayon::prelude::*;
use std::fmt::{Debug, Display};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Per-item outcome
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult<R> {
    Produced(R),
    Failed(String),
}

impl<R> BatchResult<R> {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Produced(_))
    }

    pub fn value(&self) -> Option<&R> {
        match self {
            BatchResult::Produced(value) => Some(value),
            BatchResult::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<R> {
        match self {
            BatchResult::Produced(value) => Some(value),
            BatchResult::Failed(_) => None,
        }
    }
}

/// Pool configuration for one call
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub kind: PoolKind,
    pub max_workers: Option<usize>,
    /// Emit a `N/total` progress line after each completion
    pub show_status: bool,
    /// Skip logging produced values
    pub mask_result: bool,
}

impl PoolOptions {
    pub fn dedicated() -> Self {
        Self {
            kind: PoolKind::Dedicated,
            max_workers: None,
            show_status: true,
            mask_result: true,
        }
    }

    /// Quiet shared pool for inner loops
    pub fn shared() -> Self {
        Self {
            kind: PoolKind::Shared,
            max_workers: None,
            show_status: false,
            mask_result: true,
        }
    }

    /// Apply executor hints on top of `self`
    pub fn with_executor(mut self, executor: &ExecutorConfig) -> Self {
        if let Some(kind) = executor.pool {
            self.kind = kind;
        }
        if executor.max_workers.is_some() {
            self.max_workers = executor.max_workers;
        }
        self
    }

    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_status(mut self, show_status: bool) -> Self {
        self.show_status = show_status;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::dedicated()
    }
}

/// Outcome of one orchestrated call
#[derive(Debug)]
pub struct PoolReport<I, R> {
    /// Items whose worker failed, in completion order
    pub failed: Vec<I>,
    /// Every item with its outcome, in completion order
    pub completed: Vec<(I, BatchResult<R>)>,
}

impl<I, R> PoolReport<I, R> {
    pub fn total(&self) -> usize {
        self.completed.len()
    }

    pub fn succeeded(&self) -> usize {
        self.completed.len() - self.failed.len()
    }

    /// Outcomes without their items
    pub fn results(&self) -> impl Iterator<Item = &BatchResult<R>> {
        self.completed.iter().map(|(_, result)| result)
    }

    /// Produced values, dropping failures
    pub fn into_values(self) -> Vec<R> {
        self.completed
            .into_iter()
            .filter_map(|(_, result)| result.into_value())
            .collect()
    }
}

/// Run `worker` over `items` and wait for every item to finish
///
/// Only pool construction can fail; worker errors and panics become
/// [`BatchResult::Failed`] entries.
pub fn wait_results<I, R, E, F>(
    worker: F,
    items: &[I],
    options: &PoolOptions,
) -> ExtractResult<PoolReport<I, R>>
where
    I: Clone + Debug + Send + Sync,
    R: Debug + Send,
    E: Display,
    F: Fn(&I) -> Result<R, E> + Sync,
{
    let total = items.len();
    let completed_count = AtomicUsize::new(0);
    let outcomes: Mutex<Vec<(I, BatchResult<R>)>> = Mutex::new(Vec::with_capacity(total));

    if total == 0 {
        return Ok(PoolReport {
            failed: Vec::new(),
            completed: Vec::new(),
        });
    }

    let process = |item: &I| {
        let outcome = run_guarded(&worker, item);
        let index = completed_count.fetch_add(1, Ordering::Relaxed) + 1;

        match &outcome {
            BatchResult::Failed(reason) => {
                error!(item = ?item, error = %reason, "Worker exited with error");
            }
            BatchResult::Produced(value) if !options.mask_result => {
                debug!(item = ?item, result = ?value, "Worker produced result");
            }
            BatchResult::Produced(_) => {}
        }

        if options.show_status {
            info!(
                item = ?item,
                success = outcome.is_success(),
                status = %format!("{}/{}", index, total),
                "Finished item"
            );
        }

        outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((item.clone(), outcome));
    };

    match options.kind {
        PoolKind::Dedicated => {
            let threads = options
                .max_workers
                .unwrap_or_else(|| total.min(default_parallelism()))
                .max(1);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|index| format!("patx-worker-{}", index))
                .build()
                .map_err(|e| ExtractError::Pool(e.to_string()))?;
            pool.install(|| items.par_iter().for_each(process));
        }
        PoolKind::Shared => match options.max_workers {
            Some(cap) if cap < total => {
                let chunk_size = total.div_ceil(cap.max(1));
                items
                    .par_chunks(chunk_size)
                    .for_each(|chunk| chunk.iter().for_each(&process));
            }
            _ => items.par_iter().for_each(process),
        },
    }

    let completed = outcomes
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let failed = completed
        .iter()
        .filter(|(_, outcome)| !outcome.is_success())
        .map(|(item, _)| item.clone())
        .collect();

    Ok(PoolReport { failed, completed })
}

/// Thread ceiling when no `max_workers` is configured
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn run_guarded<I, R, E, F>(worker: &F, item: &I) -> BatchResult<R>
where
    E: Display,
    F: Fn(&I) -> Result<R, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| worker(item))) {
        Ok(Ok(value)) => BatchResult::Produced(value),
        Ok(Err(e)) => BatchResult::Failed(e.to_string()),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            BatchResult::Failed(format!("panic: {}", reason))
        }
    }
}

/// Log a succeeded/failed summary for one batch
///
/// Failed items are listed individually at warning level.
pub fn display_status<I: Debug>(name: &str, total: usize, failed: &[I]) {
    let failure = failed.len();
    let succeeded = total.saturating_sub(failure);
    let ratio = if total == 0 {
        0.0
    } else {
        (succeeded as f64 * 100.0) / total as f64
    };

    if failure > 0 {
        let listing: Vec<String> = failed.iter().map(|item| format!(" - {:?}", item)).collect();
        warn!(
            "some items for {} service have failed:\n{}",
            name,
            listing.join("\n")
        );
    }

    info!(
        "{} conversion done. succeeded: {} failure: {} ratio: {:.0}%",
        name, succeeded, failure, ratio
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_one_failure_in_ten_items() {
        let items: Vec<u32> = (0..10).collect();
        let report = wait_results(
            |n: &u32| {
                if *n == 7 {
                    Err(format!("cannot decode item {}", n))
                } else {
                    Ok(n * 2)
                }
            },
            &items,
            &PoolOptions::dedicated(),
        )
        .unwrap();

        assert_eq!(report.total(), 10);
        assert_eq!(report.succeeded(), 9);
        assert_eq!(report.failed, vec![7]);

        let mut values = report.into_values();
        values.sort();
        assert_eq!(values, vec![0, 2, 4, 6, 8, 10, 12, 16, 18]);
    }

    #[test]
    fn test_panicking_worker_is_recorded() {
        let items = vec!["ok", "boom", "fine"];
        let report = wait_results(
            |s: &&str| -> Result<usize, String> {
                if *s == "boom" {
                    panic!("exploded on {}", s);
                }
                Ok(s.len())
            },
            &items,
            &PoolOptions::shared(),
        )
        .unwrap();

        assert_eq!(report.failed, vec!["boom"]);
        let failure = report
            .completed
            .iter()
            .find(|(item, _)| *item == "boom")
            .map(|(_, outcome)| outcome.clone())
            .unwrap();
        match failure {
            BatchResult::Failed(reason) => assert!(reason.contains("exploded on boom")),
            BatchResult::Produced(_) => panic!("Expected failure"),
        }
    }

    #[test]
    fn test_dedicated_pool_respects_max_workers() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..12).collect();

        let report = wait_results(
            |_: &u32| -> Result<(), String> {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            &items,
            &PoolOptions::dedicated().with_max_workers(Some(3)),
        )
        .unwrap();

        assert_eq!(report.succeeded(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_shared_pool_cap_limits_chunks() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let items: Vec<u32> = (0..8).collect();

        let report = wait_results(
            |_: &u32| -> Result<(), String> {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            },
            &items,
            &PoolOptions::shared().with_max_workers(Some(2)),
        )
        .unwrap();

        assert_eq!(report.succeeded(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_empty_items() {
        let items: Vec<u32> = Vec::new();
        let report = wait_results(|n: &u32| Ok::<_, String>(*n), &items, &PoolOptions::dedicated())
            .unwrap();
        assert_eq!(report.total(), 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_executor_hints_override_defaults() {
        let executor = ExecutorConfig {
            max_workers: Some(5),
            pool: Some(PoolKind::Shared),
        };
        let options = PoolOptions::dedicated().with_executor(&executor);
        assert_eq!(options.kind, PoolKind::Shared);
        assert_eq!(options.max_workers, Some(5));

        let untouched = PoolOptions::shared().with_executor(&ExecutorConfig::default());
        assert_eq!(untouched.kind, PoolKind::Shared);
        assert!(untouched.max_workers.is_none());
    }
}
