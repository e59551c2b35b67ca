//! Common error types for patx

use thiserror::Error;

/// Common result type for patx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across patx crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration could not be parsed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON configuration could not be parsed
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}
