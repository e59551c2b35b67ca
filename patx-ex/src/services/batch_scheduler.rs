//! Batch scheduler
//!
//! Drives a run in three phases:
//!
//! 1. **INIT**: scan every dataset directory, apply `only`, queue the files.
//! 2. **ROUNDS**: each round takes up to `step` files from every class that still
//!    has some and runs one batch per class. Batches of a round run concurrently
//!    (tokio blocking tasks, at most `max_workers` at once); inside a batch the
//!    files go through the worker pool. Rounds are sequential, so a class's
//!    results are never touched by two rounds at once.
//! 3. **MERGE**: classes split over several rounds combine their checkpoints with
//!    the results kept from their last round into the final artifact. Methods that
//!    ignore splits persist every round themselves and skip this phase.
//!
//! Per-file failures are reported and skipped. A batch that fails as a whole
//! (save error, pool error) is logged and recorded in the run summary; the run
//! goes on with the other classes.

use crate::error::{ExtractError, ExtractResult};
use crate::extractors::{FeatureMethod, Partial, SaveStage};
use crate::services::checkpoint;
use crate::services::file_scanner::FileScanner;
use crate::services::worker_pool::{display_status, wait_results, PoolOptions};
use crate::utils::MediaDecoder;
use futures::stream::{self, StreamExt};
use patx_common::{DatasetSpec, RunConfig};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One class's share of a round
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBatch {
    pub class: String,
    /// Global round index, from 1
    pub round: usize,
    pub paths: Vec<PathBuf>,
    pub stage: SaveStage,
    /// The class has (or will have) more than one round
    pub split: bool,
}

impl PlannedBatch {
    /// Results stay in memory for the merge instead of being saved
    pub fn retains_results(&self, ignore_split: bool) -> bool {
        !ignore_split && self.split && self.stage == SaveStage::Final
    }
}

#[derive(Debug)]
struct ClassQueue {
    class: String,
    remaining: VecDeque<PathBuf>,
    step: Option<usize>,
    checkpoints: usize,
}

/// Round partitioning of every class's files
///
/// Pure bookkeeping: produces the batches of each round, performs no IO.
#[derive(Debug, Default)]
pub struct RoundPlanner {
    queues: Vec<ClassQueue>,
    round: usize,
}

impl RoundPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a class; `step` of `None` dispatches everything in one round
    pub fn add_class(&mut self, class: impl Into<String>, paths: Vec<PathBuf>, step: Option<usize>) {
        self.queues.push(ClassQueue {
            class: class.into(),
            remaining: paths.into(),
            step,
            checkpoints: 0,
        });
    }

    /// Rounds planned so far
    pub fn rounds(&self) -> usize {
        self.round
    }

    pub fn remaining(&self, class: &str) -> usize {
        self.queues
            .iter()
            .find(|q| q.class == class)
            .map(|q| q.remaining.len())
            .unwrap_or(0)
    }

    pub fn is_done(&self) -> bool {
        self.queues.iter().all(|q| q.remaining.is_empty())
    }

    /// Batches of the next round, `None` once every class is drained
    pub fn next_round(&mut self) -> Option<Vec<PlannedBatch>> {
        if self.is_done() {
            return None;
        }
        self.round += 1;
        let round = self.round;

        let batches = self
            .queues
            .iter_mut()
            .filter(|queue| !queue.remaining.is_empty())
            .map(|queue| {
                let take = queue
                    .step
                    .unwrap_or(queue.remaining.len())
                    .min(queue.remaining.len());
                let paths: Vec<PathBuf> = queue.remaining.drain(..take).collect();

                let stage = if queue.remaining.is_empty() {
                    SaveStage::Final
                } else {
                    queue.checkpoints += 1;
                    SaveStage::Checkpoint { round }
                };

                PlannedBatch {
                    class: queue.class.clone(),
                    round,
                    paths,
                    stage,
                    split: queue.checkpoints > 0,
                }
            })
            .collect();

        Some(batches)
    }

    /// Classes with at least one checkpoint, with their checkpoint count, in queue order
    pub fn split_classes(&self) -> Vec<(String, usize)> {
        self.queues
            .iter()
            .filter(|q| q.checkpoints > 0)
            .map(|q| (q.class.clone(), q.checkpoints))
            .collect()
    }
}

/// Outcome of one batch
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub class: String,
    pub round: usize,
    pub stage: SaveStage,
    pub total: usize,
    pub failed: Vec<PathBuf>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed.len()
    }
}

/// Batch report plus the results kept in memory for the merge
#[derive(Debug)]
pub struct BatchOutcome {
    pub report: BatchReport,
    pub retained: Option<Vec<Partial>>,
}

/// What a run did
#[derive(Debug, Default)]
pub struct RunSummary {
    pub rounds: usize,
    pub batches: Vec<BatchReport>,
    /// Batches that failed as a whole: class, round, reason
    pub failed_batches: Vec<(String, usize, String)>,
    /// Classes whose checkpoints were merged
    pub merged: Vec<String>,
    pub merge_failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn files_processed(&self) -> usize {
        self.batches.iter().map(|b| b.total).sum()
    }

    pub fn files_failed(&self) -> usize {
        self.batches.iter().map(|b| b.failed.len()).sum()
    }

    /// No batch or merge failed as a whole
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty() && self.merge_failures.is_empty()
    }
}

/// Run one class's batch: decode and process every file, then save
///
/// Blocking; called from a tokio blocking task.
pub fn run_batch(
    method: &dyn FeatureMethod,
    decoder: &dyn MediaDecoder,
    dataset: &DatasetSpec,
    batch: &PlannedBatch,
) -> ExtractResult<BatchOutcome> {
    let hints = method.hints();
    let kind = method.input_kind();

    debug!(
        class = %batch.class,
        round = batch.round,
        files = batch.paths.len(),
        "Batch started"
    );

    let options = PoolOptions {
        kind: hints.batch_pool,
        ..PoolOptions::dedicated()
    }
    .with_executor(&dataset.executor);

    let report = wait_results(
        |path: &PathBuf| -> ExtractResult<Partial> {
            let input = decoder
                .decode(kind, path)
                .map_err(|e| ExtractError::Decode {
                    path: path.clone(),
                    reason: format!("{:#}", e),
                })?;
            method.run(&input, dataset, path)
        },
        &batch.paths,
        &options,
    )?;

    display_status(&batch.class, report.total(), &report.failed);

    let summary = BatchReport {
        class: batch.class.clone(),
        round: batch.round,
        stage: batch.stage,
        total: report.total(),
        failed: report.failed.clone(),
    };
    let results = report.into_values();

    if batch.retains_results(hints.ignore_split) {
        debug!(class = %batch.class, results = results.len(), "Results kept for merge");
        return Ok(BatchOutcome {
            report: summary,
            retained: Some(results),
        });
    }

    let target = checkpoint::artifact_target(dataset, batch.stage);
    method.save(&target, results, dataset)?;

    Ok(BatchOutcome {
        report: summary,
        retained: None,
    })
}

/// Round-based scheduler over every dataset of a run
pub struct BatchScheduler {
    datasets: Vec<Arc<DatasetSpec>>,
    max_workers: Option<usize>,
    method: Arc<dyn FeatureMethod>,
    decoder: Arc<dyn MediaDecoder>,
    scanner: FileScanner,
}

impl BatchScheduler {
    /// `method` must already be initialized with the config's datasets
    pub fn new(
        config: &RunConfig,
        method: Arc<dyn FeatureMethod>,
        decoder: Arc<dyn MediaDecoder>,
    ) -> Self {
        Self {
            datasets: config.datasets.iter().cloned().map(Arc::new).collect(),
            max_workers: config.max_workers,
            method,
            decoder,
            scanner: FileScanner::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: FileScanner) -> Self {
        self.scanner = scanner;
        self
    }

    fn dataset(&self, class: &str) -> ExtractResult<Arc<DatasetSpec>> {
        self.datasets
            .iter()
            .find(|d| d.class == class)
            .cloned()
            .ok_or_else(|| ExtractError::Config(format!("Unknown class \"{}\"", class)))
    }

    /// INIT phase: scan every dataset and queue its files
    pub fn plan(&self) -> ExtractResult<RoundPlanner> {
        let mut planner = RoundPlanner::new();
        for dataset in &self.datasets {
            let paths = self.scanner.scan_dataset(&dataset.path, dataset.only)?;
            info!(
                class = %dataset.class,
                files = paths.len(),
                step = ?dataset.step,
                "Dataset scanned"
            );
            planner.add_class(dataset.class.clone(), paths, dataset.step);
        }
        Ok(planner)
    }

    /// Run every round, then merge split classes
    pub async fn run(&self) -> ExtractResult<RunSummary> {
        let mut planner = self.plan()?;
        let hints = self.method.hints();
        let mut summary = RunSummary::default();
        let mut retained: HashMap<String, Vec<Partial>> = HashMap::new();

        while let Some(batches) = planner.next_round() {
            let round = planner.rounds();
            for batch in &batches {
                info!(
                    round,
                    "remaining paths for [{}]: {}",
                    batch.class,
                    planner.remaining(&batch.class) + batch.paths.len()
                );
            }

            let width = self.max_workers.unwrap_or(batches.len()).max(1);
            let mut tasks = Vec::with_capacity(batches.len());
            for batch in batches {
                tasks.push((self.dataset(&batch.class)?, batch));
            }

            let outcomes: Vec<(String, usize, ExtractResult<BatchOutcome>)> = stream::iter(tasks)
                .map(|(dataset, batch)| {
                    let method = Arc::clone(&self.method);
                    let decoder = Arc::clone(&self.decoder);

                    async move {
                        let class = batch.class.clone();
                        let round = batch.round;
                        let joined = tokio::task::spawn_blocking(move || {
                            run_batch(method.as_ref(), decoder.as_ref(), &dataset, &batch)
                        })
                        .await;

                        let outcome = joined.unwrap_or_else(|e| {
                            Err(ExtractError::Pool(format!("batch task aborted: {}", e)))
                        });
                        (class, round, outcome)
                    }
                })
                .buffer_unordered(width)
                .collect()
                .await;

            for (class, round, outcome) in outcomes {
                match outcome {
                    Ok(outcome) => {
                        if let Some(results) = outcome.retained {
                            retained.insert(class, results);
                        }
                        summary.batches.push(outcome.report);
                    }
                    Err(e) => {
                        error!(class = %class, round, error = %e, "Batch failed");
                        summary.failed_batches.push((class, round, e.to_string()));
                    }
                }
            }
        }
        summary.rounds = planner.rounds();

        if hints.ignore_split {
            debug!(method = self.method.name(), "Method persists every round; no merge");
            return Ok(summary);
        }

        for (class, checkpoints) in planner.split_classes() {
            let dataset = self.dataset(&class)?;
            let last_round = retained.remove(&class).unwrap_or_else(|| {
                warn!(class = %class, "No results kept from the last round");
                Vec::new()
            });
            let method = Arc::clone(&self.method);

            let merged = tokio::task::spawn_blocking(move || {
                checkpoint::merge_split_dataset(method.as_ref(), &dataset, checkpoints, last_round)
            })
            .await
            .unwrap_or_else(|e| Err(ExtractError::Pool(format!("merge task aborted: {}", e))));

            match merged {
                Ok(()) => summary.merged.push(class),
                Err(e) => {
                    error!(class = %class, error = %e, "Merge failed");
                    summary.merge_failures.push((class, e.to_string()));
                }
            }
        }

        Ok(summary)
    }
}
