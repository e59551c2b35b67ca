//! Color histogram
//!
//! Counts how many pixels of each color appear across every image of a class.
//! Partial results are plain counters and merge by summation, so a class split
//! over several rounds yields the same final artifact as a single round.

use super::{
    rank_colors, ranking_rows, require_pattern_outputs, write_color_ranking, ArtifactTarget,
    ColorCounter, FeatureMethod, MethodHints, Partial, Row, SaveStage,
};
use crate::error::{ExtractError, ExtractResult};
use crate::services::checkpoint;
use crate::utils::color::pixel_key;
use crate::utils::{DecodedInput, PixelGrid};
use patx_common::DatasetSpec;
use std::path::Path;
use tracing::info;

pub const NAME: &str = "color-histogram";
pub const DESCRIPTION: &str = "Pixel count per color over every image of a class";

#[derive(Debug, Default)]
pub struct ColorHistogram;

impl ColorHistogram {
    pub fn new() -> Self {
        Self
    }

    /// Pixel count per color of one image
    pub fn count_colors(grid: &PixelGrid) -> ColorCounter {
        let mut counter = ColorCounter::new();
        for pixel in grid.pixels() {
            *counter.entry(pixel_key(pixel)).or_insert(0) += 1;
        }
        counter
    }

    fn aggregate(results: &[Partial]) -> ExtractResult<ColorCounter> {
        let mut total = ColorCounter::new();
        for partial in results {
            match partial {
                Partial::Counts(counts) => {
                    for (color, count) in counts {
                        *total.entry(color.clone()).or_insert(0) += count;
                    }
                }
                other => {
                    return Err(ExtractError::method(
                        NAME,
                        format!("unexpected partial result: {:?}", other),
                    ))
                }
            }
        }
        Ok(total)
    }
}

impl FeatureMethod for ColorHistogram {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn hints(&self) -> MethodHints {
        MethodHints::default()
    }

    fn init(&mut self, datasets: &[DatasetSpec]) -> ExtractResult<()> {
        require_pattern_outputs(NAME, datasets)
    }

    fn run(&self, input: &DecodedInput, _dataset: &DatasetSpec, path: &Path) -> ExtractResult<Partial> {
        match input {
            DecodedInput::Image(grid) => Ok(Partial::Counts(Self::count_colors(grid))),
            DecodedInput::Audio(_) => Err(ExtractError::method(
                NAME,
                format!("{} is not an image", path.display()),
            )),
        }
    }

    fn dump(&self, results: &[Partial], _dataset: &DatasetSpec) -> ExtractResult<Vec<Row>> {
        Ok(ranking_rows(rank_colors(Self::aggregate(results)?)))
    }

    fn save(
        &self,
        target: &ArtifactTarget,
        results: Vec<Partial>,
        dataset: &DatasetSpec,
    ) -> ExtractResult<()> {
        let path = target.require_path(NAME)?;

        match target.stage {
            // Checkpoints keep every color; truncation would make merging lossy
            SaveStage::Checkpoint { round } => {
                let counter = Self::aggregate(&results)?;
                checkpoint::write_json(path, &counter)?;
                info!(
                    class = %dataset.class,
                    round,
                    colors = counter.len(),
                    "checkpoint of {} was saved", dataset.class
                );
            }
            SaveStage::Final => {
                let rows = self.dump(&results, dataset)?;
                let max_results = dataset.pattern.as_ref().and_then(|p| p.max_results);
                write_color_ranking(path, &rows, max_results)?;
                info!(
                    class = %dataset.class,
                    colors = rows.len(),
                    "patterns of {} was saved successfully", dataset.class
                );
            }
        }
        Ok(())
    }

    fn read_checkpoint(&self, path: &Path) -> ExtractResult<Partial> {
        checkpoint::read_json::<ColorCounter>(path).map(Partial::Counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_colors() {
        let grid = PixelGrid::from_fn(2, 2, |row, _| if row == 0 { [255, 0, 0] } else { [0, 0, 0] });
        let counter = ColorHistogram::count_colors(&grid);
        assert_eq!(counter.get("0xff0000"), Some(&2));
        assert_eq!(counter.get("0x000000"), Some(&2));
    }

    #[test]
    fn test_aggregate_sums_counts() {
        let a: ColorCounter = [("0x000000".to_string(), 3)].into_iter().collect();
        let b: ColorCounter = [("0x000000".to_string(), 2), ("0xffffff".to_string(), 1)]
            .into_iter()
            .collect();
        let total = ColorHistogram::aggregate(&[Partial::Counts(a), Partial::Counts(b)]).unwrap();
        assert_eq!(total.get("0x000000"), Some(&5));
        assert_eq!(total.get("0xffffff"), Some(&1));
    }

    #[test]
    fn test_aggregate_rejects_foreign_partial() {
        let result = ColorHistogram::aggregate(&[Partial::Features(vec![])]);
        assert!(matches!(result, Err(ExtractError::Method { .. })));
    }
}
