//! Error types for patx-ex
//!
//! Per-item failures never surface here: the worker pool converts them into
//! `BatchResult::Failed`. These variants cover structural failures that abort a
//! run, a merge, or a method operation.

use std::path::PathBuf;
use thiserror::Error;

/// Extraction engine error type
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Input file could not be decoded
    #[error("Decode failed for {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// Configuration defect detected by the engine (unknown method, missing options)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint artifact missing or corrupt during merge
    #[error("Checkpoint error at {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    /// Flush-on-demand cache could not persist an entry
    #[error("Cache flush failed for key {key}: {reason}")]
    Cache { key: String, reason: String },

    /// Feature method received input it cannot process
    #[error("Method {method} failed: {reason}")]
    Method { method: String, reason: String },

    /// Worker pool could not be built
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Dataset directory could not be listed
    #[error("Scan error: {0}")]
    Scan(#[from] crate::services::file_scanner::ScanError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// patx-common error
    #[error("Common error: {0}")]
    Common(#[from] patx_common::Error),
}

impl ExtractError {
    pub(crate) fn method(method: &str, reason: impl Into<String>) -> Self {
        Self::Method {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for engine operations
pub type ExtractResult<T> = Result<T, ExtractError>;
