//! Run configuration model and loading
//!
//! A run is described by one file (TOML or JSON, chosen by extension) naming the
//! feature method, the global worker cap and the list of datasets. Every dataset
//! maps a class label to a source directory plus method-specific sub-objects.
//!
//! Loading validates everything the scheduler relies on, so configuration defects
//! surface before any file is scanned.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Registered feature method name (see `patx-ex --list-methods`)
    pub method: String,

    /// Cap on concurrently running batches per round (default: one per batch)
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Options shared by every dataset for the selected method
    #[serde(default)]
    pub method_options: MethodOptions,

    /// Labeled datasets, processed in this order every round
    pub datasets: Vec<DatasetSpec>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Method-wide options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodOptions {
    /// Tabular output settings for feature-vector methods
    #[serde(default)]
    pub feature: Option<FeatureOutputOptions>,

    /// Flush-on-demand cache tuning for streaming methods
    #[serde(default)]
    pub cache: CacheOptions,
}

/// Tabular output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureOutputOptions {
    /// Output base path; each formatter appends its own extension
    pub output: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// ARFF relation name (required when ARFF output is enabled)
    #[serde(default)]
    pub relation_name: Option<String>,
}

/// Which tabular formatters to instantiate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    All,
    Arff,
    Csv,
    Null,
}

/// Flush-on-demand cache tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Minimum seconds between two flush sweeps
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Entries idle longer than this are evicted by a sweep
    #[serde(default = "default_flush_idle")]
    pub flush_idle_secs: u64,

    /// Backing store directory (default: `<tmp>/patx-spill`)
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval(),
            flush_idle_secs: default_flush_idle(),
            spill_dir: None,
        }
    }
}

fn default_flush_interval() -> u64 {
    30
}

fn default_flush_idle() -> u64 {
    60
}

/// One labeled class of input files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Unique class label
    pub class: String,

    /// Source directory
    pub path: PathBuf,

    /// Cap on the total number of files taken from `path`
    #[serde(default)]
    pub only: Option<usize>,

    /// Files dispatched per round (default: everything in one round)
    #[serde(default)]
    pub step: Option<usize>,

    /// Executor hints for this dataset's batches
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Options for the color pattern methods
    #[serde(default)]
    pub pattern: Option<PatternOptions>,

    /// Options for the region feature method
    #[serde(default)]
    pub feature: Option<FeatureOptions>,
}

/// Worker pool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolKind {
    /// A pool built for this call only; items never share the caller's threads
    Dedicated,
    /// Run on the enclosing thread pool, sharing memory with the caller
    Shared,
}

/// Executor hints
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub max_workers: Option<usize>,

    #[serde(default)]
    pub pool: Option<PoolKind>,
}

/// Per-dataset options of the color pattern methods
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternOptions {
    /// JSON artifact path; checkpoints and the final artifact derive from it
    pub output: PathBuf,

    /// Keep only the N most frequent colors in the final artifact
    #[serde(default)]
    pub max_results: Option<usize>,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Per-dataset options of the region feature method
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureOptions {
    #[serde(default)]
    pub layout: Vec<FeatureLayout>,

    /// Executor hints for the per-pixel tier
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// A named feature: a color range plus an optional spatial region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub name: String,

    pub ranges: ColorRanges,

    #[serde(default)]
    pub regions: Regions,
}

/// Per-channel inclusive bounds; absent channels are unconstrained
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColorRanges {
    #[serde(default)]
    pub red: Option<ChannelRange>,
    #[serde(default)]
    pub green: Option<ChannelRange>,
    #[serde(default)]
    pub blue: Option<ChannelRange>,
}

/// Inclusive channel bounds `[from - margin, to + margin]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelRange {
    pub from: i32,

    /// Defaults to `from`
    #[serde(default)]
    pub to: Option<i32>,

    #[serde(default)]
    pub margin: i32,
}

impl ChannelRange {
    pub fn new(from: i32, to: i32) -> Self {
        Self {
            from,
            to: Some(to),
            margin: 0,
        }
    }

    /// Effective inclusive bounds with the margin applied
    pub fn bounds(&self) -> (i32, i32) {
        let to = self.to.unwrap_or(self.from);
        (self.from - self.margin, to + self.margin)
    }
}

/// Fractional spatial constraints, each a percentage of the image size
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Regions {
    #[serde(default)]
    pub top: Option<f64>,
    #[serde(default)]
    pub bottom: Option<f64>,
    #[serde(default)]
    pub left: Option<f64>,
    #[serde(default)]
    pub right: Option<f64>,
}

impl RunConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: RunConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<()> {
        if self.method.trim().is_empty() {
            return Err(Error::Config("Missing \"method\" in configuration".to_string()));
        }

        if self.datasets.is_empty() {
            return Err(Error::Config("Missing \"datasets\" in configuration".to_string()));
        }

        if self.max_workers == Some(0) {
            return Err(Error::Config("\"max_workers\" must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for (index, dataset) in self.datasets.iter().enumerate() {
            if dataset.class.trim().is_empty() {
                return Err(Error::Config(format!(
                    "Missing \"class\" in dataset number #{}",
                    index
                )));
            }
            if dataset.path.as_os_str().is_empty() {
                return Err(Error::Config(format!(
                    "Missing \"path\" in dataset number #{}",
                    index
                )));
            }
            if !seen.insert(dataset.class.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate class \"{}\" in dataset number #{}",
                    dataset.class, index
                )));
            }
            if dataset.step == Some(0) {
                return Err(Error::Config(format!(
                    "\"step\" must be at least 1 for dataset \"{}\"",
                    dataset.class
                )));
            }
            if dataset.only == Some(0) {
                return Err(Error::Config(format!(
                    "\"only\" must be at least 1 for dataset \"{}\"",
                    dataset.class
                )));
            }
            let pixel_pool = dataset.feature.as_ref().and_then(|f| f.executor.pool);
            if pixel_pool == Some(PoolKind::Dedicated) {
                return Err(Error::Config(format!(
                    "\"feature.executor.pool\" must be \"shared\" for dataset \"{}\"",
                    dataset.class
                )));
            }
            for executor in executors_of(dataset) {
                if executor.max_workers == Some(0) {
                    return Err(Error::Config(format!(
                        "\"max_workers\" must be at least 1 for dataset \"{}\"",
                        dataset.class
                    )));
                }
            }
        }

        Ok(())
    }
}

fn executors_of(dataset: &DatasetSpec) -> [ExecutorConfig; 3] {
    [
        dataset.executor,
        dataset.pattern.as_ref().map(|p| p.executor).unwrap_or_default(),
        dataset.feature.as_ref().map(|f| f.executor).unwrap_or_default(),
    ]
}

/// Load and validate a run configuration file
///
/// `.json` files are parsed as JSON, everything else as TOML.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    debug!(path = %path.display(), json = is_json, "Loading run configuration");

    if is_json {
        RunConfig::from_json_str(&content)
    } else {
        RunConfig::from_toml_str(&content)
    }
}
