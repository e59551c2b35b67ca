//! Region color features
//!
//! Each configured feature pairs a color range with an optional spatial region.
//! For every image the method counts the pixels matching both, per feature, and
//! reports them as a percentage of the image's pixel count. Rows are classified
//! in parallel on the shared pool; each row produces a local counter that is
//! merged sequentially.

use super::formatters::{Column, FeatureTable};
use super::{ArtifactTarget, Cell, FeatureMethod, MethodHints, Partial, Row};
use crate::error::{ExtractError, ExtractResult};
use crate::services::worker_pool::{wait_results, PoolOptions};
use crate::utils::{DecodedInput, PixelGrid};
use patx_common::{
    ChannelRange, ColorRanges, DatasetSpec, ExecutorConfig, FeatureLayout, FeatureOutputOptions,
    PoolKind, Regions,
};
use std::collections::HashSet;
use std::convert::Infallible;
use std::path::Path;
use tracing::debug;

pub const NAME: &str = "region-features";
pub const DESCRIPTION: &str = "Extracts pre-defined image features.";

/// Whether a pixel lies within every configured channel range
pub fn is_in_color(red: u8, green: u8, blue: u8, ranges: &ColorRanges) -> bool {
    let within = |value: u8, range: &Option<ChannelRange>| match range {
        Some(range) => {
            let (low, high) = range.bounds();
            (low..=high).contains(&i32::from(value))
        }
        None => true,
    };

    within(red, &ranges.red) && within(green, &ranges.green) && within(blue, &ranges.blue)
}

/// Whether pixel `(x, y)` lies within every configured region
///
/// `x` is the row index and `y` the column index. Region sizes are percentages:
/// `top`/`bottom` compare the row with a fraction of the height, `left`/`right`
/// compare the column with a fraction of the width.
pub fn is_in_region(width: usize, height: usize, x: usize, y: usize, regions: &Regions) -> bool {
    let (width, height) = (width as f64, height as f64);
    let (x, y) = (x as f64, y as f64);

    let checks = [
        regions.top.map(|size| x < height * size / 100.0),
        regions.bottom.map(|size| x > height * size / 100.0),
        regions.left.map(|size| y < width * size / 100.0),
        regions.right.map(|size| y > width * size / 100.0),
    ];
    checks.iter().all(|check| check.unwrap_or(true))
}

pub struct RegionColorFeature {
    output: Option<FeatureOutputOptions>,
    layouts: Vec<FeatureLayout>,
    table: Option<FeatureTable>,
}

impl RegionColorFeature {
    pub fn new(output: Option<FeatureOutputOptions>) -> Self {
        Self {
            output,
            layouts: Vec::new(),
            table: None,
        }
    }

    pub fn layouts(&self) -> &[FeatureLayout] {
        &self.layouts
    }

    /// Feature percentages of one image, in layout order
    pub fn extract_features(
        &self,
        grid: &PixelGrid,
        executor: &ExecutorConfig,
    ) -> ExtractResult<Vec<(String, f64)>> {
        let pixel_count = grid.pixel_count();
        if pixel_count == 0 {
            return Err(ExtractError::method(NAME, "image has no pixels"));
        }

        let rows: Vec<usize> = (0..grid.height()).collect();
        // Config validation only admits the shared pool here
        let options = PoolOptions::shared().with_max_workers(executor.max_workers);

        let report = wait_results(
            |row: &usize| Ok::<_, Infallible>(self.classify_row(grid, *row)),
            &rows,
            &options,
        )?;
        if !report.failed.is_empty() {
            return Err(ExtractError::method(
                NAME,
                format!("{} rows could not be classified", report.failed.len()),
            ));
        }

        let mut totals = vec![0u64; self.layouts.len()];
        for counts in report.into_values() {
            for (total, count) in totals.iter_mut().zip(counts) {
                *total += count;
            }
        }

        Ok(self
            .layouts
            .iter()
            .zip(totals)
            .map(|(layout, count)| {
                (
                    layout.name.clone(),
                    (count as f64 * 100.0) / pixel_count as f64,
                )
            })
            .collect())
    }

    fn classify_row(&self, grid: &PixelGrid, row: usize) -> Vec<u64> {
        let mut counts = vec![0u64; self.layouts.len()];
        for (column, pixel) in grid.row(row).iter().enumerate() {
            for (count, layout) in counts.iter_mut().zip(&self.layouts) {
                if is_in_region(grid.width(), grid.height(), row, column, &layout.regions)
                    && is_in_color(pixel[0], pixel[1], pixel[2], &layout.ranges)
                {
                    *count += 1;
                }
            }
        }
        counts
    }
}

impl FeatureMethod for RegionColorFeature {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn hints(&self) -> MethodHints {
        MethodHints {
            ignore_split: true,
            batch_pool: PoolKind::Dedicated,
        }
    }

    fn init(&mut self, datasets: &[DatasetSpec]) -> ExtractResult<()> {
        let output = self.output.clone().ok_or_else(|| {
            ExtractError::Config(format!("Method {} requires \"method_options.feature\"", NAME))
        })?;

        let mut layouts = Vec::new();
        let mut names = HashSet::new();
        let mut classes = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            classes.push(dataset.class.clone());
            for layout in dataset.feature.iter().flat_map(|f| f.layout.iter()) {
                if !names.insert(layout.name.clone()) {
                    return Err(ExtractError::Config(format!(
                        "Duplicate feature \"{}\" in dataset \"{}\"",
                        layout.name, dataset.class
                    )));
                }
                layouts.push(layout.clone());
            }
        }
        if layouts.is_empty() {
            return Err(ExtractError::Config(format!(
                "Method {} requires at least one \"feature.layout\" entry",
                NAME
            )));
        }

        let mut columns = vec![Column::nominal("class", classes)];
        columns.extend(layouts.iter().map(|layout| Column::real(layout.name.clone())));

        self.table = Some(FeatureTable::create(&output, columns)?);
        self.layouts = layouts;
        debug!(features = self.layouts.len(), "Region features initialized");
        Ok(())
    }

    fn run(&self, input: &DecodedInput, dataset: &DatasetSpec, path: &Path) -> ExtractResult<Partial> {
        let grid = match input {
            DecodedInput::Image(grid) => grid,
            DecodedInput::Audio(_) => {
                return Err(ExtractError::method(
                    NAME,
                    format!("{} is not an image", path.display()),
                ))
            }
        };
        let executor = dataset.feature.as_ref().map(|f| f.executor).unwrap_or_default();
        self.extract_features(grid, &executor).map(Partial::Features)
    }

    fn dump(&self, results: &[Partial], dataset: &DatasetSpec) -> ExtractResult<Vec<Row>> {
        feature_rows(NAME, results, dataset)
    }

    fn save(
        &self,
        _target: &ArtifactTarget,
        results: Vec<Partial>,
        dataset: &DatasetSpec,
    ) -> ExtractResult<()> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| ExtractError::method(NAME, "save called before init"))?;
        table.append(&self.dump(&results, dataset)?)
    }
}

/// One row per file: the class label followed by the feature values
pub(crate) fn feature_rows(
    method: &str,
    results: &[Partial],
    dataset: &DatasetSpec,
) -> ExtractResult<Vec<Row>> {
    results
        .iter()
        .map(|partial| match partial {
            Partial::Features(values) => Ok(Row {
                label: dataset.class.clone(),
                values: values.iter().map(|(_, v)| Cell::Real(*v)).collect(),
            }),
            other => Err(ExtractError::method(
                method,
                format!("unexpected partial result: {:?}", other),
            )),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_range(from: i32, to: i32) -> ColorRanges {
        ColorRanges {
            red: Some(ChannelRange::new(from, to)),
            ..ColorRanges::default()
        }
    }

    #[test]
    fn test_is_in_color() {
        assert!(is_in_color(128, 0, 0, &red_range(100, 150)));
        assert!(!is_in_color(128, 0, 0, &red_range(100, 120)));
    }

    #[test]
    fn test_is_in_color_margin_and_default_to() {
        let ranges = ColorRanges {
            green: Some(ChannelRange {
                from: 50,
                to: None,
                margin: 5,
            }),
            ..ColorRanges::default()
        };
        assert!(is_in_color(0, 55, 0, &ranges));
        assert!(is_in_color(0, 45, 0, &ranges));
        assert!(!is_in_color(0, 56, 0, &ranges));
    }

    #[test]
    fn test_empty_ranges_match_everything() {
        assert!(is_in_color(1, 2, 3, &ColorRanges::default()));
    }

    #[test]
    fn test_is_in_region() {
        let top_half = Regions {
            top: Some(50.0),
            ..Regions::default()
        };
        assert!(is_in_region(100, 200, 10, 5, &top_half));

        let top_sliver = Regions {
            top: Some(1.0),
            ..Regions::default()
        };
        assert!(!is_in_region(100, 200, 10, 5, &top_sliver));
    }

    #[test]
    fn test_is_in_region_combines_constraints() {
        let corner = Regions {
            bottom: Some(50.0),
            right: Some(50.0),
            ..Regions::default()
        };
        assert!(is_in_region(10, 10, 8, 8, &corner));
        assert!(!is_in_region(10, 10, 8, 2, &corner));
        assert!(is_in_region(10, 10, 0, 0, &Regions::default()));
    }
}
