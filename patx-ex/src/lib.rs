//! patx-ex library interface
//!
//! Concurrent batch feature extraction over labeled media datasets. A run loads a
//! [`RunConfig`], builds the configured feature method from the
//! [`MethodRegistry`](extractors::MethodRegistry) and hands it to the
//! [`BatchScheduler`](services::BatchScheduler).

pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

pub use crate::error::{ExtractError, ExtractResult};

use extractors::MethodRegistry;
use patx_common::RunConfig;
use services::{BatchScheduler, RunSummary};
use std::sync::Arc;
use tracing::info;
use utils::{FileDecoder, MediaDecoder};

/// Run extraction with the default file decoder
pub async fn run_extraction(config: &RunConfig) -> ExtractResult<RunSummary> {
    run_extraction_with(config, Arc::new(FileDecoder)).await
}

/// Run extraction with a caller-supplied decoder
pub async fn run_extraction_with(
    config: &RunConfig,
    decoder: Arc<dyn MediaDecoder>,
) -> ExtractResult<RunSummary> {
    let mut method = MethodRegistry::builtin().create(config)?;
    method.init(&config.datasets)?;
    info!(
        method = method.name(),
        datasets = config.datasets.len(),
        "Feature method initialized"
    );

    BatchScheduler::new(config, Arc::from(method), decoder)
        .run()
        .await
}
