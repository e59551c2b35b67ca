//! Checkpoint artifacts and merge
//!
//! A class split across several rounds leaves one checkpoint per non-final round
//! next to its pattern output: `<stem>-<round><ext>`. The merge step reads them
//! back in round order, deletes each one once loaded, appends the results kept
//! in memory from the last round and hands everything to the method's final save
//! (`<stem>-summarized<ext>`).

use crate::error::{ExtractError, ExtractResult};
use crate::extractors::{ArtifactTarget, FeatureMethod, Partial, SaveStage};
use patx_common::DatasetSpec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `<dir>/<stem>-<label><ext>`
pub fn labeled_path(output: &Path, label: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match output.extension() {
        Some(ext) => format!("{}-{}.{}", stem, label, ext.to_string_lossy()),
        None => format!("{}-{}", stem, label),
    };
    output.with_file_name(file_name)
}

pub fn checkpoint_path(output: &Path, round: usize) -> PathBuf {
    labeled_path(output, &round.to_string())
}

pub fn final_path(output: &Path) -> PathBuf {
    labeled_path(output, "summarized")
}

/// Artifact target of `dataset` for `stage`
pub fn artifact_target(dataset: &DatasetSpec, stage: SaveStage) -> ArtifactTarget {
    let path = dataset.pattern.as_ref().map(|pattern| match stage {
        SaveStage::Checkpoint { round } => checkpoint_path(&pattern.output, round),
        SaveStage::Final => final_path(&pattern.output),
    });
    ArtifactTarget { path, stage }
}

/// Serialize `value` as JSON, creating parent directories
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ExtractResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec(value)?;
    std::fs::write(path, bytes)?;
    debug!(path = %path.display(), "Artifact written");
    Ok(())
}

/// Load a JSON checkpoint
///
/// Missing or corrupt files surface as [`ExtractError::Checkpoint`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ExtractResult<T> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ExtractError::Checkpoint {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Combine the checkpoints of a split class into its final artifact
///
/// `split_rounds` is the number of checkpointed rounds (1..=split_rounds);
/// `last_round` holds the in-memory results of the class's final round.
/// A missing or corrupt checkpoint aborts the merge for this class; checkpoints
/// already consumed stay deleted.
pub fn merge_split_dataset(
    method: &dyn FeatureMethod,
    dataset: &DatasetSpec,
    split_rounds: usize,
    last_round: Vec<Partial>,
) -> ExtractResult<()> {
    let output = dataset
        .pattern
        .as_ref()
        .map(|pattern| pattern.output.clone())
        .ok_or_else(|| {
            ExtractError::Config(format!(
                "Cannot merge dataset \"{}\" without \"pattern.output\"",
                dataset.class
            ))
        })?;

    let mut results = Vec::with_capacity(split_rounds + last_round.len());
    for round in 1..=split_rounds {
        let path = checkpoint_path(&output, round);
        debug!(class = %dataset.class, path = %path.display(), "Loading checkpoint");
        results.push(method.read_checkpoint(&path)?);
        std::fs::remove_file(&path)?;
    }
    results.extend(last_round);

    let target = ArtifactTarget {
        path: Some(final_path(&output)),
        stage: SaveStage::Final,
    };
    method.save(&target, results, dataset)?;

    info!(
        class = %dataset.class,
        checkpoints = split_rounds,
        "patterns of {} was merged successfully", dataset.class
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_and_final_paths() {
        let output = Path::new("/out/bart.json");
        assert_eq!(checkpoint_path(output, 2), PathBuf::from("/out/bart-2.json"));
        assert_eq!(final_path(output), PathBuf::from("/out/bart-summarized.json"));
    }

    #[test]
    fn test_labeled_path_without_extension() {
        assert_eq!(
            labeled_path(Path::new("out/colors"), "1"),
            PathBuf::from("out/colors-1")
        );
    }

    #[test]
    fn test_read_json_missing_file_is_checkpoint_error() {
        let result: ExtractResult<Vec<String>> = read_json(Path::new("/nonexistent/cp-1.json"));
        assert!(matches!(result, Err(ExtractError::Checkpoint { .. })));
    }
}
