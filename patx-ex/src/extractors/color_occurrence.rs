//! Color occurrence
//!
//! Counts, per color, the number of distinct files of a class in which it
//! appears. Per-file color sets are streamed through the flush-on-demand cache
//! into a spill directory instead of being held in memory for the whole run; the
//! final save flushes everything, counts across the spilled sets and removes them.

use super::{
    rank_colors, ranking_rows, require_pattern_outputs, write_color_ranking, ArtifactTarget,
    ColorCounter, FeatureMethod, MethodHints, Partial, Row, SaveStage,
};
use crate::error::{ExtractError, ExtractResult};
use crate::services::checkpoint;
use crate::services::worker_pool::{display_status, wait_results, BatchResult, PoolOptions};
use crate::utils::color::pixel_key;
use crate::utils::{CacheEntry, DecodedInput, FlushOnDemand, PixelGrid};
use patx_common::{CacheOptions, DatasetSpec, ExecutorConfig, PoolKind};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const NAME: &str = "color-occurrence";
pub const DESCRIPTION: &str = "Number of images of a class in which each color appears";

type ColorSet = BTreeSet<String>;

pub struct ColorOccurrence {
    cache: FlushOnDemand<ColorSet>,
    spill_dir: PathBuf,
    /// Spilled sets of earlier rounds, per class
    spilled: Mutex<HashMap<String, Vec<PathBuf>>>,
}

impl ColorOccurrence {
    pub fn new(options: &CacheOptions) -> Self {
        let spill_dir = options
            .spill_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("patx-spill"));
        Self {
            cache: FlushOnDemand::from_options(options),
            spill_dir,
            spilled: Mutex::new(HashMap::new()),
        }
    }

    /// Distinct colors of one image
    pub fn distinct_colors(grid: &PixelGrid) -> ColorSet {
        grid.pixels().iter().map(pixel_key).collect()
    }

    fn register(&self, class: &str, targets: Vec<PathBuf>) {
        let mut spilled = self
            .spilled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        spilled.entry(class.to_string()).or_default().extend(targets);
    }

    fn take_registered(&self, class: &str) -> Vec<PathBuf> {
        self.spilled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(class)
            .unwrap_or_default()
    }

    fn spill_targets(results: &[Partial]) -> ExtractResult<Vec<PathBuf>> {
        results
            .iter()
            .map(|partial| match partial {
                Partial::Spilled { target, .. } => Ok(target.clone()),
                other => Err(ExtractError::method(
                    NAME,
                    format!("unexpected partial result: {:?}", other),
                )),
            })
            .collect()
    }

    /// Files per color across the spilled sets
    ///
    /// Flushes the cache first so every target exists on disk.
    fn count_occurrences(
        &self,
        targets: &[PathBuf],
        class: &str,
        executor: ExecutorConfig,
    ) -> ExtractResult<ColorCounter> {
        let flushed = self.cache.flush_all()?;
        debug!(flushed, class = %class, "Cache flushed before counting");

        let options = PoolOptions::shared().with_executor(&executor);
        let report = wait_results(
            |target: &PathBuf| checkpoint::read_json::<ColorSet>(target),
            targets,
            &options,
        )?;
        display_status(class, report.total(), &report.failed);

        // Every spilled set must be counted
        let lost = report.completed.iter().find_map(|(path, outcome)| match outcome {
            BatchResult::Failed(reason) => Some((path.clone(), reason.clone())),
            BatchResult::Produced(_) => None,
        });
        if let Some((path, reason)) = lost {
            return Err(ExtractError::Checkpoint { path, reason });
        }

        let mut counter = ColorCounter::new();
        for colors in report.into_values() {
            for color in colors {
                *counter.entry(color).or_insert(0) += 1;
            }
        }
        Ok(counter)
    }
}

impl FeatureMethod for ColorOccurrence {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn hints(&self) -> MethodHints {
        MethodHints {
            ignore_split: true,
            batch_pool: PoolKind::Dedicated,
        }
    }

    fn init(&mut self, datasets: &[DatasetSpec]) -> ExtractResult<()> {
        require_pattern_outputs(NAME, datasets)?;
        std::fs::create_dir_all(&self.spill_dir)?;
        debug!(spill_dir = %self.spill_dir.display(), "Spill directory ready");
        Ok(())
    }

    fn run(&self, input: &DecodedInput, dataset: &DatasetSpec, path: &Path) -> ExtractResult<Partial> {
        let grid = match input {
            DecodedInput::Image(grid) => grid,
            DecodedInput::Audio(_) => {
                return Err(ExtractError::method(
                    NAME,
                    format!("{} is not an image", path.display()),
                ))
            }
        };

        // Datasets may share files; entries must not replace each other across classes
        let key = format!("{}:{}", dataset.class, path.display());
        let target = self
            .spill_dir
            .join(&dataset.class)
            .join(format!("{}.json", Uuid::new_v4()));

        self.cache.update(CacheEntry::new(
            key.clone(),
            target.clone(),
            Self::distinct_colors(grid),
        ))?;

        Ok(Partial::Spilled { key, target })
    }

    fn dump(&self, results: &[Partial], dataset: &DatasetSpec) -> ExtractResult<Vec<Row>> {
        let targets = Self::spill_targets(results)?;
        let executor = dataset
            .pattern
            .as_ref()
            .map(|p| p.executor)
            .unwrap_or_default();
        let counter = self.count_occurrences(&targets, &dataset.class, executor)?;
        Ok(ranking_rows(rank_colors(counter)))
    }

    fn save(
        &self,
        target: &ArtifactTarget,
        results: Vec<Partial>,
        dataset: &DatasetSpec,
    ) -> ExtractResult<()> {
        match target.stage {
            SaveStage::Checkpoint { round } => {
                let targets = Self::spill_targets(&results)?;
                debug!(class = %dataset.class, round, files = targets.len(), "Spilled sets registered");
                self.register(&dataset.class, targets);
                Ok(())
            }
            SaveStage::Final => {
                let path = target.require_path(NAME)?;

                let mut targets = self.take_registered(&dataset.class);
                targets.extend(Self::spill_targets(&results)?);
                let partials: Vec<Partial> = targets
                    .iter()
                    .map(|target| Partial::Spilled {
                        key: target.display().to_string(),
                        target: target.clone(),
                    })
                    .collect();

                let rows = self.dump(&partials, dataset)?;
                let max_results = dataset.pattern.as_ref().and_then(|p| p.max_results);
                write_color_ranking(path, &rows, max_results)?;

                for spill in &targets {
                    if let Err(e) = std::fs::remove_file(spill) {
                        warn!(path = %spill.display(), error = %e, "Failed to remove spilled set");
                    }
                }

                info!(
                    class = %dataset.class,
                    files = targets.len(),
                    colors = rows.len(),
                    "patterns of {} was saved successfully", dataset.class
                );
                Ok(())
            }
        }
    }
}
