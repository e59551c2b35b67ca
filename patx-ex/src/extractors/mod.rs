//! Feature methods
//!
//! A feature method turns one decoded file into a [`Partial`] result, reduces a
//! class's partial results into output rows, and persists them. The scheduler
//! drives every method through the same lifecycle:
//!
//! 1. `init` once with every dataset (output layout, formatters, validation)
//! 2. `run` per file, on worker threads, as a pure function of the decoded file
//! 3. `save` per batch, with the stage telling checkpoint from final artifact
//! 4. `read_checkpoint` during merge, for methods that do not ignore splits
//!
//! Methods are looked up by name through [`MethodRegistry`], built once at startup.

pub mod audio_features;
pub mod color_histogram;
pub mod color_occurrence;
pub mod formatters;
pub mod region_features;
pub mod spectral;

pub use audio_features::AudioFeatureVector;
pub use color_histogram::ColorHistogram;
pub use color_occurrence::ColorOccurrence;
pub use formatters::{Column, ColumnKind, FeatureTable};
pub use region_features::{is_in_color, is_in_region, RegionColorFeature};

use crate::error::{ExtractError, ExtractResult};
use crate::utils::{DecodedInput, InputKind};
use patx_common::{DatasetSpec, PoolKind, RunConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Color key to occurrence count
pub type ColorCounter = BTreeMap<String, u64>;

/// Result of running a method over one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Partial {
    /// Pixel count per color
    Counts(ColorCounter),
    /// Distinct colors of one file, held by the flush-on-demand cache under `key`
    /// and written to `target` once flushed
    Spilled { key: String, target: PathBuf },
    /// Feature name and value, in column order
    Features(Vec<(String, f64)>),
}

/// One output cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Count(u64),
    Real(f64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Count(n) => write!(f, "{}", n),
            Cell::Real(x) => write!(f, "{}", x),
        }
    }
}

/// One output row: a label (class or color key) followed by values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: String,
    pub values: Vec<Cell>,
}

/// Which artifact a `save` call produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    /// Partial state of round `round`; more rounds follow for this class
    Checkpoint { round: usize },
    /// Last save for this class
    Final,
}

/// Where and what to save
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactTarget {
    /// Artifact path, when the dataset declares a pattern output
    pub path: Option<PathBuf>,
    pub stage: SaveStage,
}

impl ArtifactTarget {
    pub(crate) fn require_path(&self, method: &str) -> ExtractResult<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| ExtractError::method(method, "no pattern output configured"))
    }
}

/// Orchestration hints declared by a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHints {
    /// Skip the merge step: every round's save is already final for the method
    pub ignore_split: bool,
    /// Pool kind for the per-file batch tier
    pub batch_pool: PoolKind,
}

impl Default for MethodHints {
    fn default() -> Self {
        Self {
            ignore_split: false,
            batch_pool: PoolKind::Dedicated,
        }
    }
}

/// Feature method contract
pub trait FeatureMethod: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn input_kind(&self) -> InputKind {
        InputKind::Image
    }

    fn hints(&self) -> MethodHints {
        MethodHints::default()
    }

    /// One-time setup with every dataset of the run
    fn init(&mut self, datasets: &[DatasetSpec]) -> ExtractResult<()>;

    /// Process one decoded file
    fn run(&self, input: &DecodedInput, dataset: &DatasetSpec, path: &Path)
        -> ExtractResult<Partial>;

    /// Reduce partial results to output rows
    fn dump(&self, results: &[Partial], dataset: &DatasetSpec) -> ExtractResult<Vec<Row>>;

    /// Persist one batch worth of results
    fn save(
        &self,
        target: &ArtifactTarget,
        results: Vec<Partial>,
        dataset: &DatasetSpec,
    ) -> ExtractResult<()>;

    /// Load a checkpoint written by `save` with a checkpoint stage
    fn read_checkpoint(&self, path: &Path) -> ExtractResult<Partial> {
        Err(ExtractError::Checkpoint {
            path: path.to_path_buf(),
            reason: format!("{} does not write checkpoints", self.name()),
        })
    }
}

/// Constructor of a registered method
pub type MethodFactory = fn(&RunConfig) -> ExtractResult<Box<dyn FeatureMethod>>;

/// Registered method
#[derive(Clone, Copy)]
pub struct MethodEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: MethodFactory,
}

/// Name to constructor mapping, built once at startup
pub struct MethodRegistry {
    entries: Vec<MethodEntry>,
}

impl MethodRegistry {
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                MethodEntry {
                    name: color_histogram::NAME,
                    description: color_histogram::DESCRIPTION,
                    build: |_| Ok(Box::new(ColorHistogram::new())),
                },
                MethodEntry {
                    name: color_occurrence::NAME,
                    description: color_occurrence::DESCRIPTION,
                    build: |config| {
                        Ok(Box::new(ColorOccurrence::new(&config.method_options.cache)))
                    },
                },
                MethodEntry {
                    name: region_features::NAME,
                    description: region_features::DESCRIPTION,
                    build: |config| {
                        Ok(Box::new(RegionColorFeature::new(
                            config.method_options.feature.clone(),
                        )))
                    },
                },
                MethodEntry {
                    name: audio_features::NAME,
                    description: audio_features::DESCRIPTION,
                    build: |config| {
                        Ok(Box::new(AudioFeatureVector::new(
                            config.method_options.feature.clone(),
                        )))
                    },
                },
            ],
        }
    }

    pub fn entries(&self) -> &[MethodEntry] {
        &self.entries
    }

    /// Build the method named by `config.method`
    pub fn create(&self, config: &RunConfig) -> ExtractResult<Box<dyn FeatureMethod>> {
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.name == config.method)
            .ok_or_else(|| {
                ExtractError::Config(format!("Unknown pattern method \"{}\".", config.method))
            })?;
        (entry.build)(config)
    }
}

/// Sort colors by descending count, ties by ascending key
pub fn rank_colors(counter: ColorCounter) -> Vec<(String, u64)> {
    let mut ranking: Vec<(String, u64)> = counter.into_iter().collect();
    ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranking
}

/// Write `{color: count}` in row order, keeping at most `max_results` rows
pub fn write_color_ranking(
    path: &Path,
    rows: &[Row],
    max_results: Option<usize>,
) -> ExtractResult<()> {
    let keep = max_results.unwrap_or(rows.len()).min(rows.len());

    let mut content = serde_json::Map::new();
    for row in &rows[..keep] {
        let value = match row.values.first() {
            Some(Cell::Count(n)) => serde_json::Value::from(*n),
            Some(Cell::Real(x)) => serde_json::Value::from(*x),
            None => serde_json::Value::Null,
        };
        content.insert(row.label.clone(), value);
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(&serde_json::Value::Object(content))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Turn a ranking into rows
pub(crate) fn ranking_rows(ranking: Vec<(String, u64)>) -> Vec<Row> {
    ranking
        .into_iter()
        .map(|(color, count)| Row {
            label: color,
            values: vec![Cell::Count(count)],
        })
        .collect()
}

/// Require `pattern.output` on every dataset
pub(crate) fn require_pattern_outputs(method: &str, datasets: &[DatasetSpec]) -> ExtractResult<()> {
    for dataset in datasets {
        if dataset.pattern.is_none() {
            return Err(ExtractError::Config(format!(
                "Method {} requires \"pattern.output\" for dataset \"{}\"",
                method, dataset.class
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_colors_orders_by_count_then_key() {
        let counter: ColorCounter = [
            ("0x000002".to_string(), 5),
            ("0x000001".to_string(), 5),
            ("0x000003".to_string(), 9),
        ]
        .into_iter()
        .collect();

        let ranking = rank_colors(counter);
        let keys: Vec<&str> = ranking.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["0x000003", "0x000001", "0x000002"]);
    }

    #[test]
    fn test_registry_rejects_unknown_method() {
        let config = RunConfig::from_json_str(
            r#"{"method": "nope", "datasets": [{"class": "a", "path": "p"}]}"#,
        )
        .unwrap();
        match MethodRegistry::builtin().create(&config) {
            Err(ExtractError::Config(msg)) => assert!(msg.contains("nope")),
            Err(other) => panic!("Expected Config error, got {}", other),
            Ok(_) => panic!("Expected Config error"),
        }
    }

    #[test]
    fn test_registry_names_are_unique() {
        let registry = MethodRegistry::builtin();
        let mut names: Vec<&str> = registry.entries().iter().map(|e| e.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), registry.entries().len());
    }

    #[test]
    fn test_partial_serialization_is_tagged() {
        let partial = Partial::Features(vec![("eyes".to_string(), 12.5)]);
        let json = serde_json::to_value(&partial).unwrap();
        assert_eq!(json["kind"], "features");
        let back: Partial = serde_json::from_value(json).unwrap();
        assert_eq!(back, partial);
    }
}
