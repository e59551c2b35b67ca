//! patx-ex - pattern extraction command line
//!
//! Loads a run configuration, extracts features from every dataset and writes the
//! configured artifacts.

use anyhow::{Context, Result};
use clap::Parser;
use patx_common::load_run_config;
use patx_ex::extractors::MethodRegistry;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Extract pattern features from labeled media datasets
#[derive(Parser, Debug)]
#[command(name = "patx-ex", version, about)]
struct Args {
    /// Run configuration file (.toml or .json)
    #[arg(short, long, default_value = "patx.toml", env = "PATX_CONFIG")]
    config: PathBuf,

    /// Be louder
    #[arg(short, long)]
    verbose: bool,

    /// List the available feature methods and exit
    #[arg(short, long)]
    list_methods: bool,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_methods {
        for entry in MethodRegistry::builtin().entries() {
            println!("{:<20} {}", entry.name, entry.description);
        }
        return Ok(());
    }

    let config = load_run_config(&args.config)
        .with_context(|| format!("Failed to load configuration {}", args.config.display()))?;

    let level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level);

    info!(
        "Starting patx-ex v{} ({}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("PATX_GIT_HASH"),
        env!("PATX_BUILD_TIMESTAMP"),
        env!("PATX_BUILD_PROFILE")
    );
    info!(
        config = %args.config.display(),
        method = %config.method,
        started_at = %chrono::Local::now().to_rfc3339(),
        "Configuration loaded"
    );

    let start = Instant::now();
    let summary = patx_ex::run_extraction(&config).await?;

    info!(
        rounds = summary.rounds,
        files = summary.files_processed(),
        failed = summary.files_failed(),
        merged = summary.merged.len(),
        "Extraction finished"
    );
    info!("time spent: {:?}", start.elapsed());

    if !summary.is_complete() {
        for (class, round, reason) in &summary.failed_batches {
            error!(class = %class, round, "Batch failed: {}", reason);
        }
        for (class, reason) in &summary.merge_failures {
            error!(class = %class, "Merge failed: {}", reason);
        }
        warn!("Run finished with failures");
        std::process::exit(1);
    }

    Ok(())
}
