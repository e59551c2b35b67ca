//! # patx Common Library
//!
//! Shared code for the patx workspace:
//! - Error type used across crates
//! - Run configuration model (datasets, feature layouts, executor hints)
//! - Configuration loading and validation (TOML or JSON)

pub mod config;
pub mod error;

pub use config::{
    load_run_config,
    CacheOptions, ChannelRange, ColorRanges, DatasetSpec, ExecutorConfig, FeatureLayout,
    FeatureOptions, FeatureOutputOptions, LoggingConfig, MethodOptions, OutputFormat,
    PatternOptions, PoolKind, Regions, RunConfig,
};
pub use error::{Error, Result};
