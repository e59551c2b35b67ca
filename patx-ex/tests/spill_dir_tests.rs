//! Default spill directory resolution
//!
//! These tests change TMPDIR and must not run alongside each other.

use patx_common::{CacheOptions, DatasetSpec, ExecutorConfig, PatternOptions};
use patx_ex::extractors::{ColorOccurrence, FeatureMethod};
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;

fn dataset(output: PathBuf) -> DatasetSpec {
    DatasetSpec {
        class: "bart".to_string(),
        path: PathBuf::from("unused"),
        only: None,
        step: None,
        executor: ExecutorConfig::default(),
        pattern: Some(PatternOptions {
            output,
            max_results: None,
            executor: ExecutorConfig::default(),
        }),
        feature: None,
    }
}

#[test]
#[serial]
fn test_spill_dir_defaults_under_temp_dir() {
    let tmp = TempDir::new().unwrap();
    let previous = std::env::var_os("TMPDIR");
    std::env::set_var("TMPDIR", tmp.path());

    let mut method = ColorOccurrence::new(&CacheOptions::default());
    let result = method.init(&[dataset(tmp.path().join("bart.json"))]);

    match previous {
        Some(value) => std::env::set_var("TMPDIR", value),
        None => std::env::remove_var("TMPDIR"),
    }

    result.unwrap();
    assert!(tmp.path().join("patx-spill").is_dir());
}

#[test]
#[serial]
fn test_configured_spill_dir_wins() {
    let tmp = TempDir::new().unwrap();
    let spill = tmp.path().join("custom");

    let mut method = ColorOccurrence::new(&CacheOptions {
        spill_dir: Some(spill.clone()),
        ..CacheOptions::default()
    });
    method.init(&[dataset(tmp.path().join("bart.json"))]).unwrap();

    assert!(spill.is_dir());
}
