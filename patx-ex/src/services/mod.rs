//! Engine services: scanning, pooling, scheduling, checkpoints, classifier glue

pub mod batch_scheduler;
pub mod checkpoint;
pub mod classifier;
pub mod file_scanner;
pub mod worker_pool;

pub use batch_scheduler::{BatchReport, BatchScheduler, PlannedBatch, RoundPlanner, RunSummary};
pub use classifier::{Classifier, ConfusionMatrix, Prediction, TrainingSet};
pub use file_scanner::{FileScanner, ScanError};
pub use worker_pool::{wait_results, BatchResult, PoolOptions, PoolReport};
